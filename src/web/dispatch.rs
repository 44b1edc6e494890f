//! Scrape Dispatch (§4.D): synchronous single-URL scrape over the job queue.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::data::models::{Document, ScrapeJobStatus, ScrapeMode};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::web::auth::extract_team_id;
use crate::web::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    pub url: String,
    #[serde(default)]
    pub page_options: Value,
    #[serde(default)]
    pub extractor_options: Option<ExtractorOptions>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub integration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractorOptions {
    pub mode: String,
    #[serde(default)]
    pub extraction_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Document>,
}

fn host_of(url: &str) -> Result<(Url, String)> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidInput(format!("invalid url: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidInput("url has no host".to_string()))?
        .to_string();
    Ok((parsed, host))
}

/// `POST /scrape`
pub async fn scrape(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ScrapeRequest>,
) -> std::result::Result<Json<ScrapeResponse>, ApiError> {
    let team_id = extract_team_id(&headers, None, &state.config)?;

    // 1. parse/normalize URL, check blocklist.
    let (parsed_url, host) = host_of(&req.url)?;
    if state.collaborators.blocklist.is_blocked(&host).await {
        return Err(AppError::BlocklistedUrl.into());
    }

    // 2. merge page options over defaults; 3. llm-extraction handling.
    let mut only_main_content = req
        .page_options
        .get("onlyMainContent")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let mut timeout = req
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(state.config.default_scrape_timeout);
    let mut is_llm = false;
    let mut extract_schema: Option<Value> = None;

    if let Some(ref extractor) = req.extractor_options {
        if extractor.mode.starts_with("llm-extraction") {
            let schema = extractor.extraction_schema.clone().ok_or_else(|| {
                AppError::InvalidInput("llm-extraction mode requires extractionSchema".to_string())
            })?;
            if !schema.is_object() {
                return Err(AppError::InvalidInput(
                    "extractionSchema must be a JSON object".to_string(),
                )
                .into());
            }
            is_llm = true;
            only_main_content = true;
            timeout = timeout.max(state.config.llm_scrape_timeout);
            extract_schema = Some(schema);
        }
    }

    // 4. resolve priority.
    let priority = state.config.base_priority + state.collaborators.priority.priority_for(&team_id).await;

    // 5. admit via Credit Gate for 1 credit.
    let admission = state.credit_gate.check(&team_id, 1.0).await?;
    if !admission.admitted {
        return Err(AppError::InsufficientCredits {
            message: admission.message.unwrap_or_default(),
        }
        .into());
    }

    // 6. construct job id, enqueue mode=single_urls.
    let job_id = Uuid::new_v4();
    let target_payload = json!({
        "url": parsed_url.as_str(),
        "onlyMainContent": only_main_content,
        "extractorOptions": req.extractor_options.as_ref().map(|e| json!({
            "mode": e.mode,
            "extractionSchema": extract_schema,
        })),
        "origin": req.origin,
        "integration": req.integration,
    });

    state
        .db
        .scrape_jobs()
        .enqueue(job_id, ScrapeMode::SingleUrls, &team_id, target_payload, priority, None, 3)
        .await?;

    // 7. wait-for-completion with timeout.
    let poll_interval = Duration::from_millis(200);
    let wait_result = tokio::time::timeout(timeout, async {
        loop {
            match state.db.scrape_jobs().state(job_id, false).await? {
                ScrapeJobStatus::Completed => {
                    let value = state.db.scrape_jobs().return_value(job_id).await?;
                    return Ok::<_, AppError>(Ok(value));
                }
                ScrapeJobStatus::Failed => {
                    let job = state.db.scrape_jobs().get(job_id).await?;
                    let error = job.and_then(|j| j.error).unwrap_or_else(|| "scrape failed".to_string());
                    return Ok(Err(error));
                }
                _ => tokio::time::sleep(poll_interval).await,
            }
        }
    })
    .await;

    let outcome = match wait_result {
        Ok(inner) => inner?,
        Err(_) => {
            // Open question (a): preserve reference behavior — a timed-out
            // v0 job is left in the queue to complete and bill normally.
            return Err(AppError::JobTimeout.into());
        }
    };

    // 8. remove terminal job on graceful completion.
    let _ = state.db.scrape_jobs().remove(job_id).await;

    let return_value = match outcome {
        Ok(value) => value,
        Err(error) => {
            if is_llm {
                return Err(AppError::LlmExtractionFailed(error).into());
            }
            return Err(AppError::QueueUnavailable(anyhow::anyhow!(error)).into());
        }
    };

    // 9. post-process document.
    let document: Document = match return_value {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| AppError::unexpected(anyhow::anyhow!("malformed job return value: {e}")))?,
        None => Document::default(),
    };
    let include_raw_html = req
        .page_options
        .get("includeRawHtml")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let include_html = req
        .page_options
        .get("includeHtml")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let document = document.elide(include_raw_html, include_html, is_llm);

    // 10. bill async: 1 base credit + 4 more for LLM extraction.
    let credits = if is_llm { 5.0 } else { 1.0 };
    state.credit_gate.bill(&team_id, None, credits, is_llm);

    Ok(Json(ScrapeResponse {
        success: true,
        data: Some(document),
    }))
}
