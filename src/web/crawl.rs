//! Crawl Kickoff (§4.E): validate, budget, and persist a new crawl, then
//! enqueue its `kickoff` expansion job.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::data::models::{ScrapeMode, StoredCrawl, TeamFlags};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::web::auth::extract_team_id;
use crate::web::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlRequest {
    pub url: String,
    #[serde(default)]
    pub scrape_options: Value,
    #[serde(default)]
    pub include_paths: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    pub limit: i64,
    #[serde(default)]
    pub max_concurrency: Option<i32>,
    #[serde(default)]
    pub webhook: Option<String>,
    #[serde(default)]
    pub zero_data_retention: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResponse {
    pub success: bool,
    pub id: Uuid,
    pub url: String,
}

/// `POST /v1/crawl`
pub async fn crawl(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CrawlRequest>,
) -> std::result::Result<Json<CrawlResponse>, ApiError> {
    let team_id = extract_team_id(&headers, None, &state.config)?;

    let origin_url = url::Url::parse(&req.url)
        .map_err(|e| AppError::InvalidInput(format!("invalid url: {e}")))?;

    // Derive the team's budget first, since ZDR policy and limit clamping
    // both read off the same chunk.
    let admission = state.credit_gate.check(&team_id, 0.0).await?;
    let flags = admission
        .chunk
        .as_ref()
        .map(|c| c.flags)
        .unwrap_or_default();
    let concurrency_cap = admission.chunk.as_ref().map(|c| c.concurrency).unwrap_or(1);

    // 2. zeroDataRetention policy.
    let force_zdr = flags.contains(TeamFlags::FORCE_ZDR);
    let allow_zdr = flags.contains(TeamFlags::ALLOW_ZDR);
    let zero_data_retention = if force_zdr {
        true
    } else if req.zero_data_retention {
        if !allow_zdr {
            return Err(AppError::ForbiddenFlag(
                "zeroDataRetention is not enabled for this team".to_string(),
            )
            .into());
        }
        true
    } else {
        false
    };

    // 4. validate includePaths/excludePaths as regex.
    for pattern in req.include_paths.iter().chain(req.exclude_paths.iter()) {
        Regex::new(pattern)
            .map_err(|e| AppError::InvalidInput(format!("invalid path pattern '{pattern}': {e}")))?;
    }

    // 5. clamp limit.
    let remaining = admission.remaining;
    let limit = if remaining.is_finite() {
        req.limit.min(remaining as i64).max(0)
    } else {
        req.limit
    };

    // 7. resolve max concurrency.
    let max_concurrency = req
        .max_concurrency
        .map(|requested| requested.min(concurrency_cap))
        .unwrap_or(concurrency_cap);

    // 8. attempt robots.txt fetch, non-fatal.
    let skip_tls_verification = req
        .scrape_options
        .get("skipTlsVerification")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let robots = state
        .collaborators
        .robots
        .fetch(origin_url.as_str(), skip_tls_verification)
        .await;
    let robots_json = robots.as_ref().map(|r| json!({ "crawlDelaySecs": r.crawl_delay_secs }));

    // If robots.txt names a crawl delay and the caller didn't set one, adopt
    // it into the effective scrape options; otherwise leave the user's value
    // (or absence of one) untouched.
    let mut scrape_options = req.scrape_options.clone();
    let user_delay_set = scrape_options
        .get("delay")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    if !user_delay_set {
        if let Some(delay) = robots.as_ref().and_then(|r| r.crawl_delay_secs).filter(|d| *d > 0.0) {
            if let Value::Object(map) = &mut scrape_options {
                map.insert("delay".to_string(), json!(delay));
            } else {
                scrape_options = json!({ "delay": delay });
            }
        }
    }

    let crawl_id = Uuid::new_v4();
    let now = Utc::now();
    let stored = StoredCrawl {
        id: crawl_id,
        origin_url: origin_url.to_string(),
        crawler_options: json!({
            "includePaths": req.include_paths,
            "excludePaths": req.exclude_paths,
            "limit": limit,
        }),
        scrape_options: scrape_options.clone(),
        internal_options: json!({
            "disableSmartWaitCache": true,
            "gcsBucket": state.config.gcs_fire_engine_bucket_name,
        }),
        team_id: team_id.clone(),
        created_at: now,
        max_concurrency: Some(max_concurrency),
        robots: robots_json,
        cancelled: false,
        zero_data_retention,
        expires_at: now + chrono::Duration::from_std(state.config.crawl_ttl).unwrap(),
    };

    // 9. persist crawl.
    state.db.crawls().save_crawl(&stored).await?;
    state.db.crawls().mark_team_using_v0(&team_id).await.ok();

    // 10. enqueue mode=kickoff job.
    let job_id = Uuid::new_v4();
    let target_payload = json!({
        "url": stored.origin_url,
        "crawlerOptions": stored.crawler_options,
        "scrapeOptions": stored.scrape_options,
        "webhook": req.webhook,
    });
    state
        .db
        .scrape_jobs()
        .enqueue(
            job_id,
            ScrapeMode::Kickoff,
            &team_id,
            target_payload,
            state.config.base_priority,
            Some(crawl_id),
            3,
        )
        .await?;
    state.db.crawls().add_crawl_job(crawl_id, job_id).await?;

    // 11. return opaque crawl id + status URL.
    let url = status_url(&headers, &state, crawl_id);
    Ok(Json(CrawlResponse {
        success: true,
        id: crawl_id,
        url,
    }))
}

fn status_url(headers: &HeaderMap, state: &AppState, crawl_id: Uuid) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = if state.config.env == "local" { "http" } else { "https" };
    format!("{scheme}://{host}/v1/crawl/{crawl_id}")
}
