//! Integration tests for the Job Queue Gateway against a throwaway schema.

mod helpers;

use std::sync::Arc;

use crawl_core::data::models::{ScrapeJobStatus, ScrapeMode};
use crawl_core::db::DbContext;
use crawl_core::events::EventBuffer;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn ctx(pool: PgPool) -> DbContext {
    DbContext::new(pool, Arc::new(EventBuffer::new(64)))
}

#[sqlx::test]
async fn lock_next_on_empty_queue_returns_none(pool: PgPool) {
    let ctx = ctx(pool);
    assert!(ctx.scrape_jobs().lock_next().await.unwrap().is_none());
}

#[sqlx::test]
async fn enqueue_then_lock_then_complete(pool: PgPool) {
    let ctx = ctx(pool);
    let job_id = Uuid::new_v4();
    ctx.scrape_jobs()
        .enqueue(job_id, ScrapeMode::SingleUrls, "team-1", json!({"url": "https://a.test"}), 10, None, 3)
        .await
        .unwrap();

    let locked = ctx.scrape_jobs().lock_next().await.unwrap().expect("job should be lockable");
    assert_eq!(locked.id, job_id);
    assert_eq!(locked.status(false), ScrapeJobStatus::Active);

    // Already locked, shouldn't dequeue again.
    assert!(ctx.scrape_jobs().lock_next().await.unwrap().is_none());

    ctx.scrape_jobs().complete(job_id, json!({"markdown": "hi"})).await.unwrap();
    let job = ctx.scrape_jobs().get(job_id).await.unwrap().expect("job should exist");
    assert_eq!(job.status(false), ScrapeJobStatus::Completed);
    assert_eq!(ctx.scrape_jobs().return_value(job_id).await.unwrap(), Some(json!({"markdown": "hi"})));
}

#[sqlx::test]
async fn enqueue_is_idempotent_under_retry(pool: PgPool) {
    let ctx = ctx(pool);
    let job_id = Uuid::new_v4();
    let first = ctx.scrape_jobs().enqueue(job_id, ScrapeMode::SingleUrls, "team-1", json!({}), 10, None, 3).await.unwrap();
    let second = ctx.scrape_jobs().enqueue(job_id, ScrapeMode::SingleUrls, "team-1", json!({"different": true}), 5, None, 3).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.target_payload, json!({}), "a conflicting insert must not overwrite the original row");
}

#[sqlx::test]
async fn failed_job_surfaces_error(pool: PgPool) {
    let ctx = ctx(pool);
    let job_id = Uuid::new_v4();
    ctx.scrape_jobs().enqueue(job_id, ScrapeMode::SingleUrls, "team-1", json!({}), 10, None, 3).await.unwrap();
    ctx.scrape_jobs().lock_next().await.unwrap();
    ctx.scrape_jobs().fail(job_id, "boom").await.unwrap();

    let job = ctx.scrape_jobs().get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status(false), ScrapeJobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("boom"));
}

#[sqlx::test]
async fn retry_unlocks_and_requeues(pool: PgPool) {
    let ctx = ctx(pool);
    let job_id = Uuid::new_v4();
    ctx.scrape_jobs().enqueue(job_id, ScrapeMode::SingleUrls, "team-1", json!({}), 10, None, 3).await.unwrap();
    ctx.scrape_jobs().lock_next().await.unwrap();

    ctx.scrape_jobs().retry(job_id, 1).await.unwrap();
    let job = ctx.scrape_jobs().get(job_id).await.unwrap().unwrap();
    assert!(job.locked_at.is_none());
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.status(false), ScrapeJobStatus::Delayed);

    let relocked = ctx.scrape_jobs().lock_next().await.unwrap().expect("retried job should be dequeueable again");
    assert_eq!(relocked.id, job_id);
}

#[sqlx::test]
async fn force_unlock_all_recovers_from_unclean_shutdown(pool: PgPool) {
    let ctx = ctx(pool);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    ctx.scrape_jobs().enqueue(a, ScrapeMode::SingleUrls, "team-1", json!({}), 10, None, 3).await.unwrap();
    ctx.scrape_jobs().enqueue(b, ScrapeMode::SingleUrls, "team-1", json!({}), 10, None, 3).await.unwrap();
    ctx.scrape_jobs().lock_next().await.unwrap();
    ctx.scrape_jobs().lock_next().await.unwrap();

    let unlocked = ctx.scrape_jobs().force_unlock_all().await.unwrap();
    assert_eq!(unlocked, 2);
    assert!(ctx.scrape_jobs().get(a).await.unwrap().unwrap().locked_at.is_none());
}
