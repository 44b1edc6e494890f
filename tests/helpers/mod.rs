use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use sqlx::PgPool;
use tokio::sync::mpsc;

use crawl_core::collaborators::fakes::{
    FakeBlocklist, FakeChildUrlExpander, FakeCreditLedger, FakePriorityResolver, FakeRobotsFetcher,
    FakeScrapeExecutor,
};
use crawl_core::collaborators::Collaborators;
use crawl_core::config::Config;
use crawl_core::credit::BillOp;
use crawl_core::data::models::TeamCreditChunk;
use crawl_core::db::DbContext;
use crawl_core::events::EventBuffer;
use crawl_core::state::AppState;

/// Build a `Config` with the same defaults `config/mod.rs` applies when an
/// env var is absent. `database_url` is unused by these tests (the pool is
/// already open) but the field is required, so it gets a harmless constant.
pub fn test_config() -> Config {
    Config {
        log_level: "info".to_string(),
        port: 8080,
        database_url: "postgres://unused/unused".to_string(),
        shutdown_timeout: Duration::from_secs(8),
        use_db_authentication: false,
        allowed_keys: vec![],
        gcs_fire_engine_bucket_name: None,
        env: "local".to_string(),
        default_scrape_timeout: Duration::from_secs(30),
        llm_scrape_timeout: Duration::from_secs(90),
        base_priority: 10,
        upgrade_url_message: "Insufficient credits. Please upgrade your plan at https://firecrawl.dev/pricing"
            .to_string(),
        crawl_ttl: Duration::from_secs(24 * 60 * 60),
        crawl_reap_interval: Duration::from_secs(5 * 60),
        billing_flush_interval: Duration::from_secs(10),
        auto_recharge_cache_ttl: Duration::from_secs(300),
        poll_interval: Duration::from_millis(1000),
        accounts_service_url: None,
        blocklist_service_url: None,
        robots_service_url: None,
        queue_priority_service_url: None,
        fire_engine_url: None,
    }
}

/// Build an `AppState` over a throwaway `#[sqlx::test]` pool, with the given
/// blocklist hosts and an optional credit chunk for `"team-1"`.
pub fn build_state(pool: PgPool, blocked_hosts: Vec<String>, chunk: Option<TeamCreditChunk>) -> AppState {
    let events = Arc::new(EventBuffer::new(64));
    let db = DbContext::new(pool, events);

    let mut ledger = FakeCreditLedger::new();
    if let Some(chunk) = chunk {
        ledger = ledger.with_chunk("team-1", chunk);
    }

    let collaborators = Arc::new(Collaborators {
        credit_ledger: Box::new(ledger),
        blocklist: Box::new(FakeBlocklist::new(blocked_hosts)),
        robots: Box::new(FakeRobotsFetcher),
        executor: Box::new(FakeScrapeExecutor),
        crawler: Box::new(FakeChildUrlExpander { child_urls: vec![] }),
        priority: Box::new(FakePriorityResolver),
    });

    let mut config = test_config();
    config.use_db_authentication = true;
    let config = Arc::new(config);

    let (billing_tx, billing_rx) = mpsc::channel::<BillOp>(16);
    // Nobody drains billing_rx in these tests; leak it so `try_send` never
    // sees a closed receiver and the gate's fire-and-forget billing behaves
    // the way it would in production.
    std::mem::forget(billing_rx);

    AppState::new(db, config, collaborators, billing_tx)
}

/// `Authorization: Bearer team-1` header map, the bearer-token-as-team-id
/// scheme `web/auth.rs` expects.
pub fn auth_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer team-1"));
    headers
}

pub fn unlimited_chunk() -> TeamCreditChunk {
    TeamCreditChunk::unlimited()
}

pub const SHORT_TIMEOUT: Duration = Duration::from_millis(100);
