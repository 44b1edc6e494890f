//! End-to-end scenarios for Scrape Dispatch (§8, scenarios 1-3), driven by
//! calling the `dispatch::scrape` handler directly against a throwaway
//! schema and fake external collaborators.

mod helpers;

use axum::Json;
use crawl_core::web::dispatch::{scrape, ExtractorOptions, ScrapeRequest};
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test]
async fn blocklisted_url_is_rejected(pool: PgPool) {
    let state = helpers::build_state(pool, vec!["blocked.example".to_string()], Some(helpers::unlimited_chunk()));

    let req = ScrapeRequest {
        url: "https://blocked.example".to_string(),
        page_options: json!({}),
        extractor_options: None,
        origin: None,
        timeout: None,
        integration: None,
    };

    let err = scrape(axum::extract::State(state), helpers::auth_headers(), Json(req))
        .await
        .expect_err("blocklisted host must be rejected");
    assert_eq!(err.code, crawl_core::web::error::ApiErrorCode::BlocklistedUrl);
}

#[sqlx::test]
async fn scrape_times_out_when_worker_never_completes(pool: PgPool) {
    // No worker pool is running against this pool, so the enqueued job is
    // never locked/completed and the wait loop must hit its own timeout.
    let state = helpers::build_state(pool, vec![], Some(helpers::unlimited_chunk()));

    let req = ScrapeRequest {
        url: "https://slow.example".to_string(),
        page_options: json!({}),
        extractor_options: None,
        origin: None,
        timeout: Some(100),
        integration: None,
    };

    let err = scrape(axum::extract::State(state), helpers::auth_headers(), Json(req))
        .await
        .expect_err("an unworked job must time out");
    assert_eq!(err.code, crawl_core::web::error::ApiErrorCode::JobTimeout);
}

#[sqlx::test]
async fn llm_extraction_happy_path_omits_raw_html(pool: PgPool) {
    let state = helpers::build_state(pool.clone(), vec![], Some(helpers::unlimited_chunk()));
    let db = state.db.clone();

    let req = ScrapeRequest {
        url: "https://example.com".to_string(),
        page_options: json!({"includeRawHtml": false}),
        extractor_options: Some(ExtractorOptions {
            mode: "llm-extraction-from-raw-html".to_string(),
            extraction_schema: Some(json!({"type": "object"})),
        }),
        origin: None,
        timeout: Some(2000),
        integration: None,
    };

    // Complete the job out-of-band, as the scraper worker pool would.
    let completer = tokio::spawn(async move {
        loop {
            if let Some(job) = db.scrape_jobs().lock_next().await.unwrap() {
                db.scrape_jobs()
                    .complete(job.id, json!({"markdown": "# hi", "rawHtml": "<html>hi</html>"}))
                    .await
                    .unwrap();
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    });

    let response = scrape(axum::extract::State(state), helpers::auth_headers(), Json(req))
        .await
        .expect("llm extraction scrape should succeed");
    completer.await.unwrap();

    assert!(response.success);
    let doc = response.data.expect("document expected");
    assert!(doc.raw_html.is_none(), "rawHtml must be omitted when not requested");
    assert!(doc.markdown.is_none(), "markdown is dropped in extract-only mode");
}
