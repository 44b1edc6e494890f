//! Job Queue Gateway consumer (§4.B.1 ambient detail): the worker pool that
//! dequeues `scrape_jobs` rows and executes them against the injected
//! `ScrapeExecutor`/`ChildUrlExpander` collaborators.
//!
//! The scraping worker's own internals are out of scope per §1's Non-goals;
//! this module is only the polling/locking consumer loop around it, which
//! §4.B.1 calls out as in-scope ambient infrastructure.

pub mod worker;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::collaborators::Collaborators;
use crate::db::DbContext;
use crate::services::Service;
use crate::status::{ServiceStatus, ServiceStatusRegistry};

use self::worker::Worker;

const WORKER_COUNT: usize = 4;

/// The service that owns the worker pool, registered with the application's
/// `ServiceManager` alongside `WebService`, `BillingAggregatorService`, and
/// `CrawlReaperService`.
pub struct ScraperService {
    db: DbContext,
    collaborators: Arc<Collaborators>,
    base_priority: i32,
    service_statuses: ServiceStatusRegistry,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl ScraperService {
    pub fn new(
        db: DbContext,
        collaborators: Arc<Collaborators>,
        base_priority: i32,
        service_statuses: ServiceStatusRegistry,
    ) -> Self {
        Self {
            db,
            collaborators,
            base_priority,
            service_statuses,
            worker_handles: Vec::new(),
            shutdown_tx: None,
        }
    }

    /// Force-unlocks jobs left locked by a previous unclean shutdown, then
    /// spawns the worker pool.
    pub async fn start(&mut self) {
        match self.db.scrape_jobs().force_unlock_all().await {
            Ok(0) => {}
            Ok(count) => warn!(count, "Force-unlocked stale jobs from previous run"),
            Err(e) => warn!(error = ?e, "Failed to force-unlock stale jobs"),
        }

        info!("ScraperService starting");

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        for i in 0..WORKER_COUNT {
            let worker = Worker::new(i, self.db.clone(), self.collaborators.clone(), self.base_priority);
            let shutdown_rx = shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                worker.run(shutdown_rx).await;
            });
            self.worker_handles.push(handle);
        }
        info!(worker_count = self.worker_handles.len(), "Spawned worker tasks");
        self.service_statuses.set("scraper", ServiceStatus::Active);
    }
}

#[async_trait::async_trait]
impl Service for ScraperService {
    fn name(&self) -> &'static str {
        "scraper"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.start().await;
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses.set("scraper", ServiceStatus::Disabled);
        info!("Shutting down scraper service");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        } else {
            warn!("No shutdown channel found for scraper service");
            return Err(anyhow::anyhow!("No shutdown channel available"));
        }

        let handles = std::mem::take(&mut self.worker_handles);
        let results = futures::future::join_all(handles).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed_count = failed, "Some scraper tasks panicked during shutdown");
            return Err(anyhow::anyhow!("{} task(s) panicked", failed));
        }

        info!("All scraper tasks shutdown gracefully");
        Ok(())
    }
}
