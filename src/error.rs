//! Top-level application error taxonomy.
//!
//! Every fallible operation in the credit gate, job queue, crawl store, and
//! dispatch/kickoff/streamer components returns `Result<T, AppError>`. The
//! web layer maps this onto [`crate::web::error::ApiError`]; the WebSocket
//! layer maps it onto a close code.

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, AppError>;

/// Error kinds named by the §7 taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("blocklisted URL")]
    BlocklistedUrl,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("{0}")]
    ForbiddenFlag(String),

    #[error("insufficient credits")]
    InsufficientCredits { message: String },

    #[error("credit check failed")]
    CreditCheckError(#[source] anyhow::Error),

    #[error("queue unavailable")]
    QueueUnavailable(#[source] anyhow::Error),

    #[error("Request timed out")]
    JobTimeout,

    #[error("{0}")]
    LlmExtractionFailed(String),

    #[error("job not found")]
    JobNotFound,

    #[error("forbidden")]
    ForbiddenTeam,

    #[error("unexpected error (id={id})")]
    Unexpected {
        id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Generate and log an opaque telemetry id for an error that should
    /// never surface its internal text to a caller.
    pub fn unexpected(err: impl Into<anyhow::Error>) -> Self {
        let source = err.into();
        let id = Uuid::new_v4();
        tracing::error!(error = %source, telemetry_id = %id, "unexpected error");
        AppError::Unexpected { id, source }
    }

    /// Map this error onto a WebSocket close code + reason, per §6/§7's
    /// close-code taxonomy for the progress streamer.
    pub fn ws_close(&self) -> (u16, String) {
        match self {
            AppError::JobNotFound => (1008, "Job not found".to_string()),
            AppError::Unauthenticated => (3000, "Unauthenticated".to_string()),
            AppError::ForbiddenTeam => (3003, "Forbidden".to_string()),
            AppError::Unexpected { id, .. } => (1011, format!("Unexpected error (id={id})")),
            other => (1011, other.to_string()),
        }
    }
}
