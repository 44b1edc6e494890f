//! Application state shared across the web edge, worker pool, billing
//! aggregator, and crawl reaper.

use std::sync::Arc;

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::credit::{BillOp, CreditGate};
use crate::db::DbContext;
use crate::status::ServiceStatusRegistry;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub db: DbContext,
    pub config: Arc<Config>,
    pub service_statuses: ServiceStatusRegistry,
    pub credit_gate: Arc<CreditGate>,
    pub collaborators: Arc<Collaborators>,
}

impl AppState {
    pub fn new(
        db: DbContext,
        config: Arc<Config>,
        collaborators: Arc<Collaborators>,
        billing_tx: mpsc::Sender<BillOp>,
    ) -> Self {
        let credit_gate = Arc::new(CreditGate::new(
            collaborators.clone(),
            billing_tx,
            config.auto_recharge_cache_ttl,
            config.use_db_authentication,
            config.allowed_keys.clone(),
            config.upgrade_url_message.clone(),
        ));

        Self {
            db,
            config,
            service_statuses: ServiceStatusRegistry::new(),
            credit_gate,
            collaborators,
        }
    }
}
