//! Crawl state store database operations.
//!
//! Crawl State Store (§4.C): per-crawl metadata, child-job id set, done-job
//! ordered sequence, and TTL-based expiry, all backed by the same Postgres
//! pool as the Job Queue Gateway.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::data::models::StoredCrawl;
use crate::db::DbContext;
use crate::error::{AppError, Result};

/// Crawl state store operations.
pub struct CrawlOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> CrawlOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Persist a new crawl record.
    pub async fn save_crawl(&self, crawl: &StoredCrawl) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawls
                (id, origin_url, crawler_options, scrape_options, internal_options,
                 team_id, created_at, max_concurrency, robots, cancelled,
                 zero_data_retention, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(crawl.id)
        .bind(&crawl.origin_url)
        .bind(&crawl.crawler_options)
        .bind(&crawl.scrape_options)
        .bind(&crawl.internal_options)
        .bind(&crawl.team_id)
        .bind(crawl.created_at)
        .bind(crawl.max_concurrency)
        .bind(&crawl.robots)
        .bind(crawl.cancelled)
        .bind(crawl.zero_data_retention)
        .bind(crawl.expires_at)
        .execute(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(())
    }

    /// Load a crawl record, excluding one that has already expired.
    pub async fn get_crawl(&self, crawl_id: Uuid) -> Result<Option<StoredCrawl>> {
        let crawl = sqlx::query_as::<_, StoredCrawl>(
            "SELECT * FROM crawls WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(crawl_id)
        .fetch_optional(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(crawl)
    }

    /// Add a job id to a crawl's child-job set.
    pub async fn add_crawl_job(&self, crawl_id: Uuid, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawl_jobs (crawl_id, job_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(crawl_id)
        .bind(job_id)
        .execute(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(())
    }

    /// Get the full child-job id set for a crawl.
    pub async fn get_crawl_jobs(&self, crawl_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT job_id FROM crawl_jobs WHERE crawl_id = $1")
                .bind(crawl_id)
                .fetch_all(self.ctx.pool())
                .await
                .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(ids)
    }

    /// Mark a child job as done, assigning it the next `done_seq` within this
    /// crawl. A no-op (returns `false`) if the job was already marked done.
    ///
    /// Assigning the sequence number inside the same statement that checks
    /// `done_seq IS NULL` gives exactly-once ordered appends under
    /// concurrent callers.
    pub async fn push_done(&self, crawl_id: Uuid, job_id: Uuid) -> Result<bool> {
        let assigned: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE crawl_jobs
            SET done_at = NOW(),
                done_seq = (SELECT COALESCE(MAX(done_seq), 0) + 1 FROM crawl_jobs WHERE crawl_id = $1)
            WHERE crawl_id = $1 AND job_id = $2 AND done_seq IS NULL
            RETURNING done_seq
            "#,
        )
        .bind(crawl_id)
        .bind(job_id)
        .fetch_optional(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(assigned.is_some())
    }

    /// Get the done-job ids in completion order.
    pub async fn get_done_ordered(&self, crawl_id: Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT job_id FROM crawl_jobs WHERE crawl_id = $1 AND done_seq IS NOT NULL ORDER BY done_seq ASC",
        )
        .bind(crawl_id)
        .fetch_all(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(ids)
    }

    /// Count of done jobs for a crawl.
    pub async fn get_done_length(&self, crawl_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM crawl_jobs WHERE crawl_id = $1 AND done_seq IS NOT NULL",
        )
        .bind(crawl_id)
        .fetch_one(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(count)
    }

    /// Whether a crawl is finished: cancelled, or every child job is done.
    pub async fn is_finished(&self, crawl_id: Uuid) -> Result<bool> {
        let row: Option<(bool, i64, i64)> = sqlx::query_as(
            r#"
            SELECT c.cancelled,
                   (SELECT COUNT(*) FROM crawl_jobs WHERE crawl_id = $1) AS total,
                   (SELECT COUNT(*) FROM crawl_jobs WHERE crawl_id = $1 AND done_seq IS NOT NULL) AS done
            FROM crawls c WHERE c.id = $1
            "#,
        )
        .bind(crawl_id)
        .fetch_optional(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        match row {
            Some((cancelled, total, done)) => Ok(cancelled || (total > 0 && total == done)),
            None => Ok(true),
        }
    }

    /// Same as `is_finished`, but serialized against concurrent callers via
    /// a Postgres advisory transaction lock keyed on the crawl id — the
    /// natural idiom for "advisory lock to serialize finalization".
    pub async fn is_finished_locked(&self, crawl_id: Uuid) -> Result<bool> {
        let mut tx = self
            .ctx
            .pool()
            .begin()
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(crawl_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        let row: Option<(bool, i64, i64)> = sqlx::query_as(
            r#"
            SELECT c.cancelled,
                   (SELECT COUNT(*) FROM crawl_jobs WHERE crawl_id = $1) AS total,
                   (SELECT COUNT(*) FROM crawl_jobs WHERE crawl_id = $1 AND done_seq IS NOT NULL) AS done
            FROM crawls c WHERE c.id = $1
            "#,
        )
        .bind(crawl_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;

        match row {
            Some((cancelled, total, done)) => Ok(cancelled || (total > 0 && total == done)),
            None => Ok(true),
        }
    }

    /// Expiry timestamp for a crawl.
    pub async fn get_expiry(&self, crawl_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let expiry: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT expires_at FROM crawls WHERE id = $1")
                .bind(crawl_id)
                .fetch_optional(self.ctx.pool())
                .await
                .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(expiry)
    }

    /// Mark a crawl cancelled.
    pub async fn cancel(&self, crawl_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE crawls SET cancelled = true WHERE id = $1")
            .bind(crawl_id)
            .execute(self.ctx.pool())
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(())
    }

    /// Hard-delete crawls (and their child-job rows via `ON DELETE CASCADE`)
    /// whose `expires_at` has passed. Called periodically by
    /// `CrawlReaperService`.
    pub async fn reap_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM crawls WHERE expires_at <= NOW()")
            .execute(self.ctx.pool())
            .await
            .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(result.rows_affected())
    }

    /// Record that a team has hit a v0 endpoint, for the global
    /// `teams_using_v0` set named in §6.
    pub async fn mark_team_using_v0(&self, team_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO teams_using_v0 (team_id, first_seen_at) VALUES ($1, NOW()) ON CONFLICT DO NOTHING",
        )
        .bind(team_id)
        .execute(self.ctx.pool())
        .await
        .map_err(|e| AppError::QueueUnavailable(e.into()))?;
        Ok(())
    }
}
