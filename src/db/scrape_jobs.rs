//! Scrape job database operations with automatic event emission.
//!
//! Job Queue Gateway (§4.B). Every state-changing method publishes a
//! `DomainEvent::ScrapeJob` after its write commits, mirroring the
//! reference's auto-event-emission `DbContext` idiom.

use chrono::Utc;
use uuid::Uuid;

use crate::data::models::{ScrapeJob, ScrapeJobStatus, ScrapeMode};
use crate::db::DbContext;
use crate::error::{AppError, Result};
use crate::events::{DomainEvent, ScrapeJobEvent};

/// Lock expiry: a job locked longer than this is assumed abandoned by a
/// crashed worker and is eligible to be re-dequeued.
const LOCK_EXPIRY_SECS: i64 = 10 * 60;

/// Scrape job operations.
pub struct ScrapeJobOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ScrapeJobOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Submit a job with a caller-supplied, stable id.
    ///
    /// Idempotent under retry of the same id: a conflicting insert is a
    /// no-op and returns the already-enqueued row.
    pub async fn enqueue(
        &self,
        job_id: Uuid,
        mode: ScrapeMode,
        team_id: &str,
        target_payload: serde_json::Value,
        priority: i32,
        crawl_id: Option<Uuid>,
        max_retries: i32,
    ) -> Result<ScrapeJob> {
        let row = sqlx::query_as::<_, ScrapeJob>(
            r#"
            INSERT INTO scrape_jobs
                (id, mode, team_id, target_payload, priority, crawl_id, queued_at, created_at, retry_count, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW(), 0, $7)
            ON CONFLICT (id) DO UPDATE SET id = scrape_jobs.id
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(mode)
        .bind(team_id)
        .bind(&target_payload)
        .bind(priority)
        .bind(crawl_id)
        .bind(max_retries)
        .fetch_one(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        self.ctx
            .events()
            .publish(DomainEvent::ScrapeJob(ScrapeJobEvent::Enqueued {
                id: row.id,
                crawl_id: row.crawl_id,
            }));

        Ok(row)
    }

    /// Fetch a single job by id.
    pub async fn get(&self, job_id: Uuid) -> Result<Option<ScrapeJob>> {
        let job = sqlx::query_as::<_, ScrapeJob>("SELECT * FROM scrape_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(self.ctx.pool())
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(job)
    }

    /// Fetch many jobs by id, in no particular order.
    pub async fn get_many(&self, job_ids: &[Uuid]) -> Result<Vec<ScrapeJob>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let jobs = sqlx::query_as::<_, ScrapeJob>("SELECT * FROM scrape_jobs WHERE id = ANY($1)")
            .bind(job_ids)
            .fetch_all(self.ctx.pool())
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(jobs)
    }

    /// Compute the observable status of a job, given whether its id is
    /// currently held back by the caller's per-team concurrency-limited set.
    pub async fn state(&self, job_id: Uuid, throttled: bool) -> Result<ScrapeJobStatus> {
        match self.get(job_id).await? {
            Some(job) => Ok(job.status(throttled)),
            None => Ok(ScrapeJobStatus::Unknown),
        }
    }

    /// Get the return value of a completed job.
    pub async fn return_value(&self, job_id: Uuid) -> Result<Option<serde_json::Value>> {
        let value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT return_value FROM scrape_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(self.ctx.pool())
                .await
                .map_err(|e| AppError::QueueUnavailable(e.into()))?
                .flatten();
        Ok(value)
    }

    /// Fetch and lock the next available job for a worker.
    ///
    /// Emits a `ScrapeJobEvent::Locked` event on success.
    pub async fn lock_next(&self) -> Result<Option<ScrapeJob>> {
        let mut tx = self
            .ctx
            .pool()
            .begin()
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        let job = sqlx::query_as::<_, ScrapeJob>(
            "SELECT * FROM scrape_jobs \
             WHERE completed_at IS NULL \
             AND (locked_at IS NULL OR locked_at < NOW() - make_interval(secs => $1::double precision)) \
             ORDER BY priority ASC, queued_at ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(LOCK_EXPIRY_SECS as f64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        if let Some(ref job) = job {
            sqlx::query("UPDATE scrape_jobs SET locked_at = NOW() WHERE id = $1")
                .bind(job.id)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        if let Some(ref job) = job {
            self.ctx
                .events()
                .publish(DomainEvent::ScrapeJob(ScrapeJobEvent::Locked {
                    id: job.id,
                    locked_at: Utc::now().to_rfc3339(),
                }));
        }

        Ok(job)
    }

    /// Mark a job completed with a return value.
    ///
    /// Emits a `ScrapeJobEvent::Completed` event.
    pub async fn complete(&self, job_id: Uuid, return_value: serde_json::Value) -> Result<()> {
        let crawl_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE scrape_jobs SET completed_at = NOW(), return_value = $2 WHERE id = $1 RETURNING crawl_id",
        )
        .bind(job_id)
        .bind(return_value)
        .fetch_optional(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?
        .flatten();

        self.ctx
            .events()
            .publish(DomainEvent::ScrapeJob(ScrapeJobEvent::Completed {
                id: job_id,
                crawl_id,
            }));

        Ok(())
    }

    /// Mark a job permanently failed (retries exhausted).
    ///
    /// Emits a `ScrapeJobEvent::Failed` event.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let crawl_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE scrape_jobs SET completed_at = NOW(), error = $2 WHERE id = $1 RETURNING crawl_id",
        )
        .bind(job_id)
        .bind(error)
        .fetch_optional(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?
        .flatten();

        self.ctx
            .events()
            .publish(DomainEvent::ScrapeJob(ScrapeJobEvent::Failed {
                id: job_id,
                crawl_id,
                error: error.to_string(),
            }));

        Ok(())
    }

    /// Unlock a job and bump its retry count so it can be dequeued again.
    ///
    /// Emits a `ScrapeJobEvent::Retried` event.
    pub async fn retry(&self, job_id: Uuid, retry_count: i32) -> Result<()> {
        sqlx::query(
            "UPDATE scrape_jobs SET locked_at = NULL, retry_count = $2, queued_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .bind(retry_count)
        .execute(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        self.ctx
            .events()
            .publish(DomainEvent::ScrapeJob(ScrapeJobEvent::Retried {
                id: job_id,
                retry_count,
                status: ScrapeJobStatus::Waiting,
            }));

        Ok(())
    }

    /// Delete terminal job artifacts.
    ///
    /// Emits a `ScrapeJobEvent::Removed` event.
    pub async fn remove(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM scrape_jobs WHERE id = $1")
            .bind(job_id)
            .execute(self.ctx.pool())
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        self.ctx
            .events()
            .publish(DomainEvent::ScrapeJob(ScrapeJobEvent::Removed { id: job_id }));

        Ok(())
    }

    /// Force-unlock all jobs that have a non-NULL `locked_at`.
    ///
    /// Intended to be called once at startup to recover jobs left locked by
    /// a previous unclean shutdown.
    pub async fn force_unlock_all(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE scrape_jobs SET locked_at = NULL, queued_at = NOW() WHERE locked_at IS NOT NULL",
        )
        .execute(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(result.rows_affected())
    }

    /// Unlock a scrape job by clearing its `locked_at` timestamp.
    ///
    /// Used to release a job back to the queue during graceful shutdown.
    pub async fn unlock(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE scrape_jobs SET locked_at = NULL WHERE id = $1")
            .bind(job_id)
            .execute(self.ctx.pool())
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_expiry_is_ten_minutes() {
        assert_eq!(LOCK_EXPIRY_SECS, 600);
    }
}
