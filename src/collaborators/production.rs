//! `reqwest`/`reqwest-middleware`-backed collaborator implementations,
//! constructed in `App::new()` the way the reference builds its `BannerApi`
//! client in `api.rs` (cookie-store-free here, since these are service-to-
//! service calls rather than a scraped session).
//!
//! Each client takes an optional base URL. When unset, it degrades to the
//! same conservative default the reference applies to
//! `GCS_FIRE_ENGINE_BUCKET_NAME`: a no-op collaborator rather than a runtime
//! panic, so the binary stays runnable against a partially configured
//! deployment.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::ClientWithMiddleware;

use super::{ChildUrlExpander, CreditLedger, RobotsFetcher, RobotsInfo, ScrapeExecutor, UrlBlocklist};
use crate::data::models::{AutoRechargeConfig, Document, TeamCreditChunk};
use crate::error::{AppError, Result};

fn build_client() -> ClientWithMiddleware {
    let client = Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(15))
        .build()
        .expect("failed to build reqwest client");
    reqwest_middleware::ClientBuilder::new(client).build()
}

/// `CreditLedger` backed by the external accounts service.
pub struct AccountsServiceClient {
    client: ClientWithMiddleware,
    base_url: Option<String>,
}

impl AccountsServiceClient {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: build_client(),
            base_url,
        }
    }
}

#[async_trait]
impl CreditLedger for AccountsServiceClient {
    async fn get_chunk(&self, team_id: &str) -> Result<Option<TeamCreditChunk>> {
        let Some(base_url) = &self.base_url else {
            return Ok(None);
        };
        let resp = self
            .client
            .get(format!("{base_url}/teams/{team_id}/credit-chunk"))
            .send()
            .await
            .map_err(|e| AppError::CreditCheckError(e.into()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let chunk = resp
            .error_for_status()
            .map_err(|e| AppError::CreditCheckError(e.into()))?
            .json::<TeamCreditChunk>()
            .await
            .map_err(|e| AppError::CreditCheckError(e.into()))?;
        Ok(Some(chunk))
    }

    async fn get_auto_recharge_config(&self, team_id: &str) -> Result<AutoRechargeConfig> {
        let Some(base_url) = &self.base_url else {
            return Ok(AutoRechargeConfig {
                enabled: false,
                threshold_credits: 0.0,
            });
        };
        let config = self
            .client
            .get(format!("{base_url}/teams/{team_id}/auto-recharge"))
            .send()
            .await
            .map_err(|e| AppError::CreditCheckError(e.into()))?
            .error_for_status()
            .map_err(|e| AppError::CreditCheckError(e.into()))?
            .json::<AutoRechargeConfig>()
            .await
            .map_err(|e| AppError::CreditCheckError(e.into()))?;
        Ok(config)
    }

    async fn attempt_recharge(&self, team_id: &str) -> Result<Option<TeamCreditChunk>> {
        let Some(base_url) = &self.base_url else {
            return Ok(None);
        };
        let resp = self
            .client
            .post(format!("{base_url}/teams/{team_id}/auto-recharge/attempt"))
            .send()
            .await
            .map_err(|e| AppError::CreditCheckError(e.into()))?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let chunk = resp
            .json::<TeamCreditChunk>()
            .await
            .map_err(|e| AppError::CreditCheckError(e.into()))?;
        Ok(Some(chunk))
    }

    async fn notify(&self, team_id: &str, kind: &str) {
        let Some(base_url) = &self.base_url else {
            return;
        };
        let result = self
            .client
            .post(format!("{base_url}/teams/{team_id}/notify"))
            .json(&serde_json::json!({ "kind": kind }))
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!(team_id, kind, error = %e, "failed to notify accounts service");
        }
    }

    async fn bill(&self, team_id: &str, sub_id: Option<&str>, credits: f64, is_extract: bool) {
        let Some(base_url) = &self.base_url else {
            return;
        };
        let result = self
            .client
            .post(format!("{base_url}/teams/{team_id}/bill"))
            .json(&serde_json::json!({ "subId": sub_id, "credits": credits, "isExtract": is_extract }))
            .send()
            .await;
        if let Err(e) = result {
            tracing::error!(team_id, error = %e, "failed to bill accounts service");
        }
    }
}

/// `UrlBlocklist` backed by an external blocklist service. Fails open (not
/// blocked) on transport errors, so a flaky blocklist dependency can't turn
/// into a full dispatch outage.
pub struct HttpBlocklist {
    client: ClientWithMiddleware,
    base_url: Option<String>,
}

impl HttpBlocklist {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: build_client(),
            base_url,
        }
    }
}

#[async_trait]
impl UrlBlocklist for HttpBlocklist {
    async fn is_blocked(&self, host: &str) -> bool {
        let Some(base_url) = &self.base_url else {
            return false;
        };
        match self
            .client
            .get(format!("{base_url}/blocklist/{host}"))
            .send()
            .await
        {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::warn!(host, error = %e, "blocklist check failed, failing open");
                false
            }
        }
    }
}

/// `RobotsFetcher` backed by an external robots-fetch capability.
pub struct HttpRobotsFetcher {
    client: ClientWithMiddleware,
    base_url: Option<String>,
}

impl HttpRobotsFetcher {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: build_client(),
            base_url,
        }
    }
}

#[async_trait]
impl RobotsFetcher for HttpRobotsFetcher {
    async fn fetch(&self, origin_url: &str, skip_tls_verification: bool) -> Option<RobotsInfo> {
        let base_url = self.base_url.as_ref()?;
        let resp = self
            .client
            .get(format!("{base_url}/robots"))
            .query(&[
                ("url", origin_url),
                ("skipTlsVerification", if skip_tls_verification { "true" } else { "false" }),
            ])
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json::<RobotsInfo>().await.ok()
    }
}

/// `JobPriorityResolver` backed by the external queue-priority service.
/// Resolves to the neutral offset (`0`) on any failure, rather than denying
/// or stalling dispatch over an unavailable side service.
pub struct HttpPriorityResolver {
    client: ClientWithMiddleware,
    base_url: Option<String>,
}

impl HttpPriorityResolver {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: build_client(),
            base_url,
        }
    }
}

#[async_trait]
impl super::JobPriorityResolver for HttpPriorityResolver {
    async fn priority_for(&self, team_id: &str) -> i32 {
        let Some(base_url) = &self.base_url else {
            return 0;
        };
        match self
            .client
            .get(format!("{base_url}/teams/{team_id}/priority"))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<i32>().await.unwrap_or(0)
            }
            _ => 0,
        }
    }
}

/// Thin proxy client onto the external fire-engine fetch/render/LLM-extract
/// service. The engine's own internals are out of scope (§1 Non-goals); this
/// crate only forwards the job payload and decodes its response shape.
pub struct FireEngineClient {
    client: ClientWithMiddleware,
    base_url: Option<String>,
}

impl FireEngineClient {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: build_client(),
            base_url,
        }
    }
}

#[async_trait]
impl ScrapeExecutor for FireEngineClient {
    async fn scrape(&self, target_payload: &serde_json::Value) -> Result<Document> {
        let base_url = self
            .base_url
            .as_ref()
            .ok_or_else(|| AppError::unexpected(anyhow::anyhow!("fire engine not configured")))?;
        let resp = self
            .client
            .post(format!("{base_url}/scrape"))
            .json(target_payload)
            .send()
            .await
            .map_err(AppError::unexpected)?
            .error_for_status()
            .map_err(AppError::unexpected)?;
        resp.json::<Document>().await.map_err(AppError::unexpected)
    }
}

#[async_trait]
impl ChildUrlExpander for FireEngineClient {
    async fn expand(&self, origin_url: &str, crawler_options: &serde_json::Value) -> Result<Vec<String>> {
        let Some(base_url) = &self.base_url else {
            // No crawl-mapping capability configured: the crawl degrades to
            // its own seed URL rather than failing outright.
            return Ok(vec![origin_url.to_string()]);
        };
        let resp = self
            .client
            .post(format!("{base_url}/map"))
            .json(&serde_json::json!({ "url": origin_url, "crawlerOptions": crawler_options }))
            .send()
            .await
            .map_err(AppError::unexpected)?
            .error_for_status()
            .map_err(AppError::unexpected)?;
        resp.json::<Vec<String>>().await.map_err(AppError::unexpected)
    }
}
