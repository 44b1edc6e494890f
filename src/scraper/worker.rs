//! A single worker: polls `lock_next`, executes the job per its mode against
//! the injected collaborators, and resolves it (complete/fail/retry).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::data::models::{ScrapeJob, ScrapeMode};
use crate::db::DbContext;
use crate::error::{AppError, Result};

/// No job available: back off before polling again.
const IDLE_POLL_DELAY: Duration = Duration::from_secs(2);
/// Queue transport error: back off longer to avoid spamming logs.
const ERROR_POLL_DELAY: Duration = Duration::from_secs(5);

pub struct Worker {
    id: usize,
    db: DbContext,
    collaborators: Arc<Collaborators>,
    base_priority: i32,
}

impl Worker {
    pub fn new(id: usize, db: DbContext, collaborators: Arc<Collaborators>, base_priority: i32) -> Self {
        Self {
            id,
            db,
            collaborators,
            base_priority,
        }
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = self.id, "Worker started");
        loop {
            tokio::select! {
                result = self.db.scrape_jobs().lock_next() => {
                    match result {
                        Ok(Some(job)) => self.process(job).await,
                        Ok(None) => time::sleep(IDLE_POLL_DELAY).await,
                        Err(e) => {
                            warn!(worker_id = self.id, error = ?e, "Failed to fetch job");
                            time::sleep(ERROR_POLL_DELAY).await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(worker_id = self.id, "Worker exiting gracefully");
                    break;
                }
            }
        }
    }

    async fn process(&self, job: ScrapeJob) {
        let job_id = job.id;
        trace!(worker_id = self.id, job_id = %job_id, mode = ?job.mode, "Processing job");

        let outcome = match job.mode {
            ScrapeMode::SingleUrls | ScrapeMode::Crawl => self.process_scrape(&job).await,
            ScrapeMode::Kickoff => self.process_kickoff(&job).await,
        };

        match outcome {
            Ok(value) => {
                if let Err(e) = self.db.scrape_jobs().complete(job_id, value).await {
                    error!(worker_id = self.id, job_id = %job_id, error = ?e, "Failed to mark job complete");
                    return;
                }
                self.push_done(&job).await;
                debug!(worker_id = self.id, job_id = %job_id, "Job completed");
            }
            Err(e) => self.handle_failure(&job, e).await,
        }
    }

    /// `single_urls`/`crawl` jobs: run the injected scrape executor and
    /// store its document as the job's return value.
    async fn process_scrape(&self, job: &ScrapeJob) -> Result<serde_json::Value> {
        let document = self.collaborators.executor.scrape(&job.target_payload).await?;
        Ok(serde_json::to_value(document).unwrap_or(serde_json::Value::Null))
    }

    /// `kickoff` jobs: expand the seed URL into child URLs and enqueue one
    /// `crawl`-mode job per child, each joining the crawl's child-job set.
    async fn process_kickoff(&self, job: &ScrapeJob) -> Result<serde_json::Value> {
        let crawl_id = job
            .crawl_id
            .ok_or_else(|| AppError::unexpected(anyhow::anyhow!("kickoff job {} missing crawl_id", job.id)))?;

        let origin_url = job.target_payload["url"].as_str().unwrap_or_default();
        let crawler_options = job
            .target_payload
            .get("crawlerOptions")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let child_urls = self.collaborators.crawler.expand(origin_url, &crawler_options).await?;
        let limit = crawler_options.get("limit").and_then(serde_json::Value::as_i64);
        let child_urls: Vec<String> = match limit {
            Some(limit) if limit >= 0 => child_urls.into_iter().take(limit as usize).collect(),
            _ => child_urls,
        };

        info!(
            worker_id = self.id,
            crawl_id = %crawl_id,
            count = child_urls.len(),
            "Crawl expanded into child URLs"
        );

        let scrape_options = job
            .target_payload
            .get("scrapeOptions")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let only_main_content = scrape_options
            .get("onlyMainContent")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);

        for url in child_urls {
            let child_id = Uuid::new_v4();
            let payload = serde_json::json!({
                "url": url,
                "onlyMainContent": only_main_content,
            });
            self.db
                .scrape_jobs()
                .enqueue(child_id, ScrapeMode::Crawl, &job.team_id, payload, self.base_priority, Some(crawl_id), 3)
                .await?;
            self.db.crawls().add_crawl_job(crawl_id, child_id).await?;
        }

        Ok(serde_json::Value::Null)
    }

    /// Append this job's terminal transition to its crawl's done-job
    /// sequence, if it belongs to one.
    async fn push_done(&self, job: &ScrapeJob) {
        if let Some(crawl_id) = job.crawl_id
            && let Err(e) = self.db.crawls().push_done(crawl_id, job.id).await
        {
            warn!(worker_id = self.id, job_id = %job.id, error = ?e, "Failed to push done marker");
        }
    }

    async fn handle_failure(&self, job: &ScrapeJob, error: AppError) {
        let job_id = job.id;
        let next_retry_count = job.retry_count + 1;

        if next_retry_count < job.max_retries {
            if let Err(e) = self.db.scrape_jobs().retry(job_id, next_retry_count).await {
                error!(worker_id = self.id, job_id = %job_id, error = ?e, "Failed to requeue job for retry");
            } else {
                warn!(
                    worker_id = self.id,
                    job_id = %job_id,
                    retry_count = next_retry_count,
                    error = %error,
                    "Job failed, retrying"
                );
            }
            return;
        }

        if let Err(e) = self.db.scrape_jobs().fail(job_id, &error.to_string()).await {
            error!(worker_id = self.id, job_id = %job_id, error = ?e, "Failed to mark job failed");
            return;
        }
        self.push_done(job).await;
        error!(worker_id = self.id, job_id = %job_id, error = %error, "Job permanently failed");
    }
}
