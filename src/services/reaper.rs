//! Periodic sweep of expired crawl records.
//!
//! TTL expiry is lazy on read (`CrawlOps::get_crawl` excludes
//! `expires_at <= NOW()`); this service performs the hard delete, mirroring
//! the reference's `db_health_check_loop`/`session_cleanup_loop` periodic
//! background-task idiom.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info};

use crate::db::DbContext;
use crate::services::Service;
use crate::status::{ServiceStatus, ServiceStatusRegistry};

pub struct CrawlReaperService {
    db: DbContext,
    service_statuses: ServiceStatusRegistry,
    reap_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl CrawlReaperService {
    pub fn new(db: DbContext, service_statuses: ServiceStatusRegistry, reap_interval: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            db,
            service_statuses,
            reap_interval,
            shutdown_tx,
        }
    }
}

#[async_trait::async_trait]
impl Service for CrawlReaperService {
    fn name(&self) -> &'static str {
        "reaper"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses.set("reaper", ServiceStatus::Active);
        let mut ticker = tokio::time::interval(self.reap_interval);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.db.crawls().reap_expired().await {
                        Ok(count) if count > 0 => info!(count, "reaped expired crawls"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "failed to reap expired crawls"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        let _ = self.shutdown_tx.send(());
        self.service_statuses.set("reaper", ServiceStatus::Disabled);
        Ok(())
    }
}
