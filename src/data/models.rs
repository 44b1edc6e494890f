//! Core persisted and wire data types for jobs, crawls, and credit chunks.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

/// What shape of work a scrape job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ScrapeMode {
    SingleUrls,
    Kickoff,
    Crawl,
}

/// Observable lifecycle state of a scrape job.
///
/// Unlike most columns on [`ScrapeJob`], this is never stored: it is derived
/// from `locked_at`/`completed_at`/`error`/`retry_count` the same way the
/// reference computes job status from nullable timestamp columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeJobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
    Prioritized,
    Unknown,
}

/// A single persisted scrape job row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScrapeJob {
    pub id: Uuid,
    pub mode: ScrapeMode,
    pub team_id: String,
    /// The Job Descriptor minus `id`/`mode`/`team_id`.
    pub target_payload: serde_json::Value,
    pub priority: i32,
    pub crawl_id: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub queued_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub return_value: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ScrapeJob {
    /// Compute the observable status from this row's columns.
    ///
    /// `prioritized` cannot be derived from the row alone: the caller passes
    /// in whether this job's id is currently held back by the per-team
    /// concurrency-limited set.
    pub fn status(&self, throttled: bool) -> ScrapeJobStatus {
        if throttled {
            return ScrapeJobStatus::Prioritized;
        }
        if self.completed_at.is_some() {
            return if self.error.is_some() {
                ScrapeJobStatus::Failed
            } else {
                ScrapeJobStatus::Completed
            };
        }
        if self.locked_at.is_some() {
            return ScrapeJobStatus::Active;
        }
        if self.retry_count > 0 {
            return ScrapeJobStatus::Delayed;
        }
        ScrapeJobStatus::Waiting
    }
}

bitflags! {
    /// Per-team policy flags carried on a credit chunk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TeamFlags: u32 {
        const FORCE_ZDR = 0b0001;
        const ALLOW_ZDR = 0b0010;
    }
}

impl Default for TeamFlags {
    fn default() -> Self {
        TeamFlags::empty()
    }
}

/// Snapshot of a team's current billing state, loaded at authentication time.
///
/// Immutable within one request; refreshed between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamCreditChunk {
    pub adjusted_credits_used: f64,
    pub remaining_credits: f64,
    pub total_credits_sum: f64,
    pub sub_id: Option<String>,
    pub sub_current_period_start: Option<DateTime<Utc>>,
    pub sub_current_period_end: Option<DateTime<Utc>>,
    pub is_extract: bool,
    pub flags: TeamFlags,
    pub concurrency: i32,
}

impl TeamCreditChunk {
    /// Unlimited sentinel chunk used for preview/unauthenticated teams.
    pub fn unlimited() -> Self {
        Self {
            adjusted_credits_used: 0.0,
            remaining_credits: f64::INFINITY,
            total_credits_sum: f64::INFINITY,
            sub_id: None,
            sub_current_period_start: None,
            sub_current_period_end: None,
            is_extract: false,
            flags: TeamFlags::ALLOW_ZDR,
            concurrency: i32::MAX,
        }
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.total_credits_sum.is_infinite() || self.total_credits_sum == 0.0 {
            return 0.0;
        }
        self.adjusted_credits_used / self.total_credits_sum
    }
}

/// Per-team auto-recharge configuration, read from the accounts store and
/// cached for a short TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRechargeConfig {
    pub enabled: bool,
    pub threshold_credits: f64,
}

/// A persisted crawl record: everything needed to resume/report on a crawl.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredCrawl {
    pub id: Uuid,
    pub origin_url: String,
    pub crawler_options: serde_json::Value,
    pub scrape_options: serde_json::Value,
    pub internal_options: serde_json::Value,
    pub team_id: String,
    pub created_at: DateTime<Utc>,
    pub max_concurrency: Option<i32>,
    pub robots: Option<serde_json::Value>,
    pub cancelled: bool,
    pub zero_data_retention: bool,
    pub expires_at: DateTime<Utc>,
}

/// Worker-produced result stored as a job's return value.
///
/// Treated as opaque by the core except for field elision (dropping
/// `rawHtml`/`html`/`markdown` per the caller's request) and token counting
/// for billing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "html")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "rawHtml")]
    pub raw_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Internal bookkeeping fields stripped before the document reaches a caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl Document {
    /// Strip internal fields and any content the caller did not request,
    /// per the Scrape Dispatch post-processing step.
    pub fn elide(mut self, include_raw_html: bool, include_html: bool, extract_only: bool) -> Self {
        self.index = None;
        self.provider = None;
        if !include_raw_html {
            self.raw_html = None;
        }
        if !include_html {
            self.html = None;
        }
        if extract_only {
            self.markdown = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_prioritized_overrides_everything() {
        let job = sample_job();
        assert_eq!(job.status(true), ScrapeJobStatus::Prioritized);
    }

    #[test]
    fn status_waiting_by_default() {
        let job = sample_job();
        assert_eq!(job.status(false), ScrapeJobStatus::Waiting);
    }

    #[test]
    fn status_active_when_locked() {
        let mut job = sample_job();
        job.locked_at = Some(Utc::now());
        assert_eq!(job.status(false), ScrapeJobStatus::Active);
    }

    #[test]
    fn status_completed_without_error() {
        let mut job = sample_job();
        job.completed_at = Some(Utc::now());
        assert_eq!(job.status(false), ScrapeJobStatus::Completed);
    }

    #[test]
    fn status_failed_with_error() {
        let mut job = sample_job();
        job.completed_at = Some(Utc::now());
        job.error = Some("boom".into());
        assert_eq!(job.status(false), ScrapeJobStatus::Failed);
    }

    #[test]
    fn status_delayed_after_retry() {
        let mut job = sample_job();
        job.retry_count = 1;
        assert_eq!(job.status(false), ScrapeJobStatus::Delayed);
    }

    #[test]
    fn unlimited_chunk_has_infinite_remaining() {
        let chunk = TeamCreditChunk::unlimited();
        assert!(chunk.remaining_credits.is_infinite());
        assert_eq!(chunk.usage_ratio(), 0.0);
    }

    #[test]
    fn document_elide_strips_unrequested_fields() {
        let doc = Document {
            markdown: Some("md".into()),
            html: Some("<p>".into()),
            raw_html: Some("<html>".into()),
            extract: None,
            metadata: None,
            index: Some(3),
            provider: Some("fire-engine".into()),
        };
        let elided = doc.elide(false, false, false);
        assert!(elided.raw_html.is_none());
        assert!(elided.html.is_none());
        assert!(elided.markdown.is_some());
        assert!(elided.index.is_none());
        assert!(elided.provider.is_none());
    }

    #[test]
    fn document_elide_drops_markdown_for_extract_only() {
        let doc = Document {
            markdown: Some("md".into()),
            ..Default::default()
        };
        let elided = doc.elide(false, false, true);
        assert!(elided.markdown.is_none());
    }

    fn sample_job() -> ScrapeJob {
        ScrapeJob {
            id: Uuid::new_v4(),
            mode: ScrapeMode::SingleUrls,
            team_id: "team-1".into(),
            target_payload: serde_json::json!({}),
            priority: 10,
            crawl_id: None,
            locked_at: None,
            queued_at: Utc::now(),
            created_at: Utc::now(),
            completed_at: None,
            retry_count: 0,
            max_retries: 3,
            return_value: None,
            error: None,
        }
    }
}
