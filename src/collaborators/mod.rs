//! External collaborator traits.
//!
//! The HTML fetch/render engine, the LLM extraction pipeline, the billing
//! ledger, robots.txt parsing, and the URL blocklist content are all out of
//! scope per the system's Purpose & Scope — each is treated as an interface
//! this crate consumes, injected into `AppState` the same way the reference
//! treats `BannerApi` as an injected external collaborator.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::data::models::{AutoRechargeConfig, Document, TeamCreditChunk};
use crate::error::Result;

pub mod production;

/// Reads and writes a team's billing state in the external accounts store.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn get_chunk(&self, team_id: &str) -> Result<Option<TeamCreditChunk>>;
    async fn get_auto_recharge_config(&self, team_id: &str) -> Result<AutoRechargeConfig>;
    /// Attempt an auto-recharge; returns the refreshed chunk on success.
    async fn attempt_recharge(&self, team_id: &str) -> Result<Option<TeamCreditChunk>>;
    /// Notify of a `LIMIT_REACHED`/`APPROACHING_LIMIT` threshold crossing.
    async fn notify(&self, team_id: &str, kind: &str);
    /// Record billed credits against a team/subscription.
    async fn bill(&self, team_id: &str, sub_id: Option<&str>, credits: f64, is_extract: bool);
}

/// Checks a URL's host against the blocklist.
#[async_trait]
pub trait UrlBlocklist: Send + Sync {
    async fn is_blocked(&self, host: &str) -> bool;
}

/// Fetches and parses a site's `robots.txt`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotsInfo {
    pub crawl_delay_secs: Option<f64>,
}

#[async_trait]
pub trait RobotsFetcher: Send + Sync {
    async fn fetch(&self, origin_url: &str, skip_tls_verification: bool) -> Option<RobotsInfo>;
}

/// Executes a single-URL scrape job and produces its return value.
///
/// Grounded on the reference worker pool's polling/locking consumer loop
/// (`db/scrape_jobs.rs::lock_next` / `scraper/worker.rs`): the consumer loop
/// is in-scope ambient infrastructure, but the actual HTML fetch/LLM
/// extraction behind it is an external collaborator.
#[async_trait]
pub trait ScrapeExecutor: Send + Sync {
    async fn scrape(&self, target_payload: &serde_json::Value) -> Result<Document>;
}

/// Expands a crawl's seed URL into child scrape job descriptors.
#[async_trait]
pub trait ChildUrlExpander: Send + Sync {
    async fn expand(&self, origin_url: &str, crawler_options: &serde_json::Value) -> Result<Vec<String>>;
}

/// Resolves a per-team priority offset, applied atop the configured base priority.
#[async_trait]
pub trait JobPriorityResolver: Send + Sync {
    async fn priority_for(&self, team_id: &str) -> i32;
}

/// Bundle of all injected external collaborators.
pub struct Collaborators {
    pub credit_ledger: Box<dyn CreditLedger>,
    pub blocklist: Box<dyn UrlBlocklist>,
    pub robots: Box<dyn RobotsFetcher>,
    pub executor: Box<dyn ScrapeExecutor>,
    pub crawler: Box<dyn ChildUrlExpander>,
    pub priority: Box<dyn JobPriorityResolver>,
}

/// In-memory fake collaborators for tests: a configurable blocklist, a
/// fixed credit chunk, no-op robots/crawl expansion, and an executor that
/// echoes a canned document.
pub mod fakes {
    use super::*;

    pub struct FakeBlocklist {
        blocked_hosts: Vec<String>,
    }

    impl FakeBlocklist {
        pub fn new(blocked_hosts: Vec<String>) -> Self {
            Self { blocked_hosts }
        }
    }

    #[async_trait]
    impl UrlBlocklist for FakeBlocklist {
        async fn is_blocked(&self, host: &str) -> bool {
            self.blocked_hosts.iter().any(|h| h == host)
        }
    }

    pub struct FakeCreditLedger {
        chunks: RwLock<HashMap<String, TeamCreditChunk>>,
    }

    impl FakeCreditLedger {
        pub fn new() -> Self {
            Self {
                chunks: RwLock::new(HashMap::new()),
            }
        }

        pub fn with_chunk(self, team_id: &str, chunk: TeamCreditChunk) -> Self {
            self.chunks
                .write()
                .expect("lock poisoned")
                .insert(team_id.to_string(), chunk);
            self
        }
    }

    impl Default for FakeCreditLedger {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CreditLedger for FakeCreditLedger {
        async fn get_chunk(&self, team_id: &str) -> Result<Option<TeamCreditChunk>> {
            Ok(self.chunks.read().expect("lock poisoned").get(team_id).cloned())
        }

        async fn get_auto_recharge_config(&self, _team_id: &str) -> Result<AutoRechargeConfig> {
            Ok(AutoRechargeConfig {
                enabled: false,
                threshold_credits: 0.0,
            })
        }

        async fn attempt_recharge(&self, _team_id: &str) -> Result<Option<TeamCreditChunk>> {
            Ok(None)
        }

        async fn notify(&self, _team_id: &str, _kind: &str) {}

        async fn bill(&self, _team_id: &str, _sub_id: Option<&str>, _credits: f64, _is_extract: bool) {}
    }

    pub struct FakeRobotsFetcher;

    #[async_trait]
    impl RobotsFetcher for FakeRobotsFetcher {
        async fn fetch(&self, _origin_url: &str, _skip_tls_verification: bool) -> Option<RobotsInfo> {
            None
        }
    }

    pub struct FakeChildUrlExpander {
        pub child_urls: Vec<String>,
    }

    #[async_trait]
    impl ChildUrlExpander for FakeChildUrlExpander {
        async fn expand(&self, _origin_url: &str, _crawler_options: &serde_json::Value) -> Result<Vec<String>> {
            Ok(self.child_urls.clone())
        }
    }

    pub struct FakeScrapeExecutor;

    #[async_trait]
    impl ScrapeExecutor for FakeScrapeExecutor {
        async fn scrape(&self, _target_payload: &serde_json::Value) -> Result<Document> {
            Ok(Document {
                markdown: Some("test content".to_string()),
                ..Default::default()
            })
        }
    }

    pub struct FakePriorityResolver;

    #[async_trait]
    impl JobPriorityResolver for FakePriorityResolver {
        async fn priority_for(&self, _team_id: &str) -> i32 {
            0
        }
    }
}
