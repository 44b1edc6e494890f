//! Asynchronous credit-billing aggregator.
//!
//! Collects `BillOp`s over an mpsc channel and flushes them to the injected
//! `CreditLedger` on a fixed interval. Billing failures are logged only —
//! per the Credit Gate's design, billing never affects a caller's response.
//! Shape grounded on `ScraperService`'s `Service` impl (background loop with
//! a broadcast shutdown signal, joined on shutdown).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::collaborators::Collaborators;
use crate::credit::BillOp;
use crate::services::Service;
use crate::status::{ServiceStatus, ServiceStatusRegistry};

/// Aggregates billing ops per (team_id, sub_id) before flushing, so a burst
/// of small scrape bills becomes a handful of ledger calls per flush tick.
fn aggregate(ops: Vec<BillOp>) -> Vec<BillOp> {
    let mut totals: HashMap<(String, Option<String>, bool), f64> = HashMap::new();
    for op in ops {
        *totals
            .entry((op.team_id, op.sub_id, op.is_extract))
            .or_insert(0.0) += op.credits;
    }
    totals
        .into_iter()
        .map(|((team_id, sub_id, is_extract), credits)| BillOp {
            team_id,
            sub_id,
            credits,
            is_extract,
        })
        .collect()
}

pub struct BillingAggregatorService {
    collaborators: Arc<Collaborators>,
    service_statuses: ServiceStatusRegistry,
    flush_interval: Duration,
    rx: mpsc::Receiver<BillOp>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl BillingAggregatorService {
    pub fn new(
        collaborators: Arc<Collaborators>,
        service_statuses: ServiceStatusRegistry,
        flush_interval: Duration,
        rx: mpsc::Receiver<BillOp>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            collaborators,
            service_statuses,
            flush_interval,
            rx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    async fn flush(&self, batch: Vec<BillOp>) {
        if batch.is_empty() {
            return;
        }
        let aggregated = aggregate(batch);
        for op in aggregated {
            self.collaborators
                .credit_ledger
                .bill(&op.team_id, op.sub_id.as_deref(), op.credits, op.is_extract)
                .await;
        }
    }
}

#[async_trait::async_trait]
impl Service for BillingAggregatorService {
    fn name(&self) -> &'static str {
        "billing"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses.set("billing", ServiceStatus::Active);
        let mut ticker = tokio::time::interval(self.flush_interval);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let mut batch = Vec::new();
            tokio::select! {
                _ = ticker.tick() => {
                    while let Ok(op) = self.rx.try_recv() {
                        batch.push(op);
                    }
                    debug!(count = batch.len(), "flushing billing batch");
                    self.flush(batch).await;
                }
                _ = shutdown_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        let _ = self.shutdown_tx.send(());
        // Drain whatever is left in the channel before exiting so the last
        // bursts of scrape bills aren't silently dropped on shutdown.
        let mut remaining = Vec::new();
        while let Ok(op) = self.rx.try_recv() {
            remaining.push(op);
        }
        if !remaining.is_empty() {
            info!(count = remaining.len(), "flushing final billing batch before shutdown");
            self.flush(remaining).await;
        }
        self.service_statuses.set("billing", ServiceStatus::Disabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_sums_same_team_and_sub() {
        let ops = vec![
            BillOp { team_id: "t1".into(), sub_id: Some("s1".into()), credits: 1.0, is_extract: false },
            BillOp { team_id: "t1".into(), sub_id: Some("s1".into()), credits: 4.0, is_extract: false },
            BillOp { team_id: "t2".into(), sub_id: None, credits: 2.0, is_extract: true },
        ];
        let agg = aggregate(ops);
        assert_eq!(agg.len(), 2);
        let t1 = agg.iter().find(|o| o.team_id == "t1").unwrap();
        assert_eq!(t1.credits, 5.0);
    }
}
