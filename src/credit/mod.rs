//! Credit Gate: admission checks and asynchronous billing against a team's
//! credit chunk.
//!
//! Grounded on the reference's DashMap-backed TTL caches (`state.rs`'s
//! reference/search-options caches) for the auto-recharge config cache, and
//! on the `ServiceStatusRegistry` DashMap-wrapper idiom (`status.rs`) for
//! shape. `bill()` only ever enqueues onto the billing aggregator's mpsc
//! channel — it must never block or fail the caller's request.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::collaborators::Collaborators;
use crate::data::models::TeamCreditChunk;
use crate::error::{AppError, Result};

/// Teams exempt from credit accounting altogether.
fn is_unlimited_team(team_id: &str) -> bool {
    team_id == "preview" || team_id.starts_with("preview_") || team_id.starts_with("env_")
}

/// Outcome of a credit admission check.
#[derive(Debug, Clone)]
pub struct AdmissionResult {
    pub admitted: bool,
    pub remaining: f64,
    pub chunk: Option<TeamCreditChunk>,
    pub message: Option<String>,
}

/// A unit of work to bill, sent to the `BillingAggregatorService`.
#[derive(Debug, Clone)]
pub struct BillOp {
    pub team_id: String,
    pub sub_id: Option<String>,
    pub credits: f64,
    pub is_extract: bool,
}

/// Maximum number of auth-bypass warnings logged process-wide.
const MAX_AUTH_BYPASS_WARNINGS: u32 = 5;

/// Credit admission and billing gate shared across request handlers.
pub struct CreditGate {
    collaborators: Arc<Collaborators>,
    billing_tx: mpsc::Sender<BillOp>,
    auto_recharge_cache: DashMap<String, (Instant, crate::data::models::AutoRechargeConfig)>,
    auto_recharge_cache_ttl: Duration,
    use_db_authentication: bool,
    allowed_keys: Vec<String>,
    upgrade_url_message: String,
    auth_bypass_warnings: AtomicU32,
}

impl CreditGate {
    pub fn new(
        collaborators: Arc<Collaborators>,
        billing_tx: mpsc::Sender<BillOp>,
        auto_recharge_cache_ttl: Duration,
        use_db_authentication: bool,
        allowed_keys: Vec<String>,
        upgrade_url_message: String,
    ) -> Self {
        Self {
            collaborators,
            billing_tx,
            auto_recharge_cache: DashMap::new(),
            auto_recharge_cache_ttl,
            use_db_authentication,
            allowed_keys,
            upgrade_url_message,
            auth_bypass_warnings: AtomicU32::new(0),
        }
    }

    /// Auth-bypass sentinel: DB-backed accounting disabled and no allow-list
    /// configured. Bounded at `MAX_AUTH_BYPASS_WARNINGS` log lines so a
    /// misconfigured deployment doesn't spam telemetry.
    fn auth_bypassed(&self) -> bool {
        if self.use_db_authentication || !self.allowed_keys.is_empty() {
            return false;
        }
        let count = self.auth_bypass_warnings.fetch_add(1, Ordering::Relaxed);
        if count < MAX_AUTH_BYPASS_WARNINGS {
            warn!(
                count = count + 1,
                "credit accounting bypassed: USE_DB_AUTHENTICATION disabled and no allowed keys configured"
            );
        }
        true
    }

    async fn cached_auto_recharge_config(
        &self,
        team_id: &str,
    ) -> Result<crate::data::models::AutoRechargeConfig> {
        if let Some(entry) = self.auto_recharge_cache.get(team_id) {
            let (cached_at, ref config) = *entry;
            if cached_at.elapsed() < self.auto_recharge_cache_ttl {
                return Ok(config.clone());
            }
        }
        let config = self
            .collaborators
            .credit_ledger
            .get_auto_recharge_config(team_id)
            .await?;
        self.auto_recharge_cache
            .insert(team_id.to_string(), (Instant::now(), config.clone()));
        Ok(config)
    }

    /// Admit a request that would consume `credits` against `team_id`'s chunk.
    ///
    /// Never admits or denies based on a real lookup for unlimited/bypassed
    /// teams — their chunk is synthesized and never surfaced as "admitted"
    /// telemetry distinct from a real admission.
    pub async fn check(&self, team_id: &str, credits: f64) -> Result<AdmissionResult> {
        if is_unlimited_team(team_id) || self.auth_bypassed() {
            return Ok(AdmissionResult {
                admitted: true,
                remaining: f64::INFINITY,
                chunk: Some(TeamCreditChunk::unlimited()),
                message: None,
            });
        }

        let chunk = self
            .collaborators
            .credit_ledger
            .get_chunk(team_id)
            .await
            .map_err(|e| AppError::CreditCheckError(anyhow::anyhow!("{e}")))?
            .unwrap_or_else(TeamCreditChunk::unlimited);

        let will_use = chunk.adjusted_credits_used + credits;
        let mut remaining = chunk.remaining_credits;

        let mut chunk = chunk;
        if will_use > chunk.total_credits_sum && chunk.total_credits_sum.is_finite() {
            let auto_recharge = self.cached_auto_recharge_config(team_id).await?;
            if auto_recharge.enabled
                && chunk.remaining_credits <= auto_recharge.threshold_credits
            {
                if let Some(refreshed) = self
                    .collaborators
                    .credit_ledger
                    .attempt_recharge(team_id)
                    .await
                    .map_err(|e| AppError::CreditCheckError(anyhow::anyhow!("{e}")))?
                {
                    remaining = refreshed.remaining_credits;
                    chunk = refreshed;
                }
            }
        }

        let will_use = chunk.adjusted_credits_used + credits;
        if will_use > chunk.total_credits_sum {
            self.collaborators
                .credit_ledger
                .notify(team_id, "LIMIT_REACHED")
                .await;
            return Ok(AdmissionResult {
                admitted: false,
                remaining,
                chunk: Some(chunk),
                message: Some(self.upgrade_url_message.clone()),
            });
        }

        let usage_ratio = chunk.usage_ratio();
        if (0.8..1.0).contains(&usage_ratio) {
            self.collaborators
                .credit_ledger
                .notify(team_id, "APPROACHING_LIMIT")
                .await;
        }

        Ok(AdmissionResult {
            admitted: true,
            remaining,
            chunk: Some(chunk),
            message: None,
        })
    }

    /// Fire-and-forget billing. Never blocks the caller; a full aggregator
    /// queue is logged and dropped, not propagated.
    pub fn bill(&self, team_id: &str, sub_id: Option<&str>, credits: f64, is_extract: bool) {
        if is_unlimited_team(team_id) {
            return;
        }
        let op = BillOp {
            team_id: team_id.to_string(),
            sub_id: sub_id.map(str::to_string),
            credits,
            is_extract,
        };
        if let Err(e) = self.billing_tx.try_send(op) {
            error!(team_id, error = %e, "billing aggregator queue full, dropping bill op");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::*;
    use crate::data::models::TeamFlags;

    fn make_collaborators(ledger: FakeCreditLedger) -> Arc<Collaborators> {
        Arc::new(Collaborators {
            credit_ledger: Box::new(ledger),
            blocklist: Box::new(FakeBlocklist::new(vec![])),
            robots: Box::new(FakeRobotsFetcher),
            executor: Box::new(FakeScrapeExecutor),
            crawler: Box::new(FakeChildUrlExpander { child_urls: vec![] }),
            priority: Box::new(FakePriorityResolver),
        })
    }

    fn make_gate(ledger: FakeCreditLedger) -> (CreditGate, mpsc::Receiver<BillOp>) {
        let (tx, rx) = mpsc::channel(16);
        let gate = CreditGate::new(
            make_collaborators(ledger),
            tx,
            Duration::from_secs(300),
            true,
            vec![],
            "upgrade please".to_string(),
        );
        (gate, rx)
    }

    #[tokio::test]
    async fn preview_team_always_admitted() {
        let (gate, _rx) = make_gate(FakeCreditLedger::new());
        let result = gate.check("preview", 1_000_000.0).await.unwrap();
        assert!(result.admitted);
        assert_eq!(result.remaining, f64::INFINITY);
    }

    #[tokio::test]
    async fn env_prefixed_team_always_admitted() {
        let (gate, _rx) = make_gate(FakeCreditLedger::new());
        let result = gate.check("env_staging", 5.0).await.unwrap();
        assert!(result.admitted);
    }

    #[tokio::test]
    async fn within_budget_is_admitted() {
        let ledger = FakeCreditLedger::new().with_chunk(
            "team-1",
            TeamCreditChunk {
                adjusted_credits_used: 10.0,
                remaining_credits: 90.0,
                total_credits_sum: 100.0,
                sub_id: None,
                sub_current_period_start: None,
                sub_current_period_end: None,
                is_extract: false,
                flags: TeamFlags::empty(),
                concurrency: 10,
            },
        );
        let (gate, _rx) = make_gate(ledger);
        let result = gate.check("team-1", 5.0).await.unwrap();
        assert!(result.admitted);
    }

    #[tokio::test]
    async fn over_budget_is_denied_with_message() {
        let ledger = FakeCreditLedger::new().with_chunk(
            "team-1",
            TeamCreditChunk {
                adjusted_credits_used: 98.0,
                remaining_credits: 2.0,
                total_credits_sum: 100.0,
                sub_id: None,
                sub_current_period_start: None,
                sub_current_period_end: None,
                is_extract: false,
                flags: TeamFlags::empty(),
                concurrency: 10,
            },
        );
        let (gate, _rx) = make_gate(ledger);
        let result = gate.check("team-1", 5.0).await.unwrap();
        assert!(!result.admitted);
        assert!(result.message.is_some());
    }

    #[tokio::test]
    async fn bill_enqueues_op() {
        let (gate, mut rx) = make_gate(FakeCreditLedger::new());
        gate.bill("team-1", Some("sub-1"), 1.0, false);
        let op = rx.recv().await.unwrap();
        assert_eq!(op.team_id, "team-1");
        assert_eq!(op.credits, 1.0);
    }

    #[tokio::test]
    async fn bill_skips_unlimited_team() {
        let (gate, mut rx) = make_gate(FakeCreditLedger::new());
        gate.bill("preview", None, 1.0, false);
        drop(gate);
        assert!(rx.recv().await.is_none());
    }
}
