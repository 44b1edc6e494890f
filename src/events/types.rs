//! Domain event types.

use crate::data::models::ScrapeJobStatus;
use uuid::Uuid;

/// Unified enum for all domain events published through the `DbContext`.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    ScrapeJob(ScrapeJobEvent),
}

/// Events emitted by `ScrapeJobOps` as a side effect of state-changing queries.
#[derive(Debug, Clone)]
pub enum ScrapeJobEvent {
    Enqueued {
        id: Uuid,
        crawl_id: Option<Uuid>,
    },
    Locked {
        id: Uuid,
        locked_at: String,
    },
    Completed {
        id: Uuid,
        crawl_id: Option<Uuid>,
    },
    Failed {
        id: Uuid,
        crawl_id: Option<Uuid>,
        error: String,
    },
    Retried {
        id: Uuid,
        retry_count: i32,
        status: ScrapeJobStatus,
    },
    Removed {
        id: Uuid,
    },
}
