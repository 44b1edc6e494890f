//! Standardized API error responses.

use crate::error::AppError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use ts_rs::TS;

/// Fixed message surfaced for every blocklisted-URL rejection.
pub const BLOCKLISTED_URL_MESSAGE: &str = "This website is no longer supported, please reach out to help@firecrawl.com for more info on how to activate it on your account.";

/// Machine-readable error code for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ApiErrorCode {
    NotFound,
    BadRequest,
    InternalError,
    Unauthorized,
    Forbidden,
    InsufficientCredits,
    CreditCheckError,
    BlocklistedUrl,
    ForbiddenFlag,
    QueueUnavailable,
    JobTimeout,
    LlmExtractionFailed,
}

/// Standardized error response for all API endpoints.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ApiError {
    /// Machine-readable error code
    pub code: ApiErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (validation errors, field info, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::BadRequest | ApiErrorCode::ForbiddenFlag => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden | ApiErrorCode::BlocklistedUrl => StatusCode::FORBIDDEN,
            ApiErrorCode::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            ApiErrorCode::JobTimeout => StatusCode::REQUEST_TIMEOUT,
            ApiErrorCode::InternalError
            | ApiErrorCode::CreditCheckError
            | ApiErrorCode::QueueUnavailable
            | ApiErrorCode::LlmExtractionFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::InvalidInput(message) => Self::new(ApiErrorCode::BadRequest, message),
            AppError::BlocklistedUrl => Self::new(ApiErrorCode::BlocklistedUrl, BLOCKLISTED_URL_MESSAGE),
            AppError::Unauthenticated => Self::new(ApiErrorCode::Unauthorized, "unauthenticated"),
            AppError::ForbiddenFlag(message) => Self::new(ApiErrorCode::ForbiddenFlag, message),
            AppError::InsufficientCredits { message } => {
                Self::new(ApiErrorCode::InsufficientCredits, message)
            }
            AppError::CreditCheckError(source) => {
                tracing::error!(error = %source, "credit check error");
                Self::new(
                    ApiErrorCode::CreditCheckError,
                    "Failed to check team credits. Please contact help@firecrawl.com.",
                )
            }
            AppError::QueueUnavailable(source) => {
                tracing::error!(error = %source, "queue unavailable");
                Self::new(ApiErrorCode::QueueUnavailable, "Queue is currently unavailable")
            }
            AppError::JobTimeout => Self::new(ApiErrorCode::JobTimeout, "Request timed out"),
            AppError::LlmExtractionFailed(message) => {
                Self::new(ApiErrorCode::LlmExtractionFailed, message)
            }
            AppError::JobNotFound => Self::new(ApiErrorCode::NotFound, "Job not found"),
            AppError::ForbiddenTeam => Self::new(ApiErrorCode::Forbidden, "Forbidden"),
            AppError::Unexpected { id, source } => {
                tracing::error!(error = %source, telemetry_id = %id, "unexpected error");
                Self::new(ApiErrorCode::InternalError, format!("Unexpected error (id={id})"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

/// Convert `(StatusCode, String)` tuple errors to ApiError
impl From<(StatusCode, String)> for ApiError {
    fn from((status, message): (StatusCode, String)) -> Self {
        let code = match status {
            StatusCode::NOT_FOUND => ApiErrorCode::NotFound,
            StatusCode::BAD_REQUEST => ApiErrorCode::BadRequest,
            StatusCode::UNAUTHORIZED => ApiErrorCode::Unauthorized,
            StatusCode::FORBIDDEN => ApiErrorCode::Forbidden,
            _ => ApiErrorCode::InternalError,
        };
        Self::new(code, message)
    }
}
