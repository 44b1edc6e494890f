//! Integration tests for the Crawl State Store against a throwaway schema.

mod helpers;

use std::sync::Arc;

use chrono::Utc;
use crawl_core::data::models::StoredCrawl;
use crawl_core::db::DbContext;
use crawl_core::events::EventBuffer;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn ctx(pool: PgPool) -> DbContext {
    DbContext::new(pool, Arc::new(EventBuffer::new(64)))
}

fn sample_crawl(id: Uuid) -> StoredCrawl {
    let now = Utc::now();
    StoredCrawl {
        id,
        origin_url: "https://example.com".to_string(),
        crawler_options: json!({"limit": 10}),
        scrape_options: json!({}),
        internal_options: json!({}),
        team_id: "team-1".to_string(),
        created_at: now,
        max_concurrency: Some(2),
        robots: None,
        cancelled: false,
        zero_data_retention: false,
        expires_at: now + chrono::Duration::hours(1),
    }
}

#[sqlx::test]
async fn save_and_get_crawl_roundtrips(pool: PgPool) {
    let ctx = ctx(pool);
    let crawl = sample_crawl(Uuid::new_v4());
    ctx.crawls().save_crawl(&crawl).await.unwrap();

    let fetched = ctx.crawls().get_crawl(crawl.id).await.unwrap().expect("crawl should exist");
    assert_eq!(fetched.origin_url, crawl.origin_url);
    assert_eq!(fetched.max_concurrency, Some(2));
}

#[sqlx::test]
async fn expired_crawl_is_not_returned(pool: PgPool) {
    let ctx = ctx(pool);
    let mut crawl = sample_crawl(Uuid::new_v4());
    crawl.expires_at = Utc::now() - chrono::Duration::hours(1);
    ctx.crawls().save_crawl(&crawl).await.unwrap();

    assert!(ctx.crawls().get_crawl(crawl.id).await.unwrap().is_none());
}

#[sqlx::test]
async fn child_job_set_and_done_ordering(pool: PgPool) {
    let ctx = ctx(pool);
    let crawl = sample_crawl(Uuid::new_v4());
    ctx.crawls().save_crawl(&crawl).await.unwrap();

    let job_a = Uuid::new_v4();
    let job_b = Uuid::new_v4();
    let job_c = Uuid::new_v4();
    for job in [job_a, job_b, job_c] {
        ctx.crawls().add_crawl_job(crawl.id, job).await.unwrap();
    }

    let all_jobs = ctx.crawls().get_crawl_jobs(crawl.id).await.unwrap();
    assert_eq!(all_jobs.len(), 3);

    assert!(ctx.crawls().push_done(crawl.id, job_b).await.unwrap());
    assert!(ctx.crawls().push_done(crawl.id, job_a).await.unwrap());
    // Re-marking an already-done job is a no-op.
    assert!(!ctx.crawls().push_done(crawl.id, job_a).await.unwrap());

    let ordered = ctx.crawls().get_done_ordered(crawl.id).await.unwrap();
    assert_eq!(ordered, vec![job_b, job_a]);
    assert_eq!(ctx.crawls().get_done_length(crawl.id).await.unwrap(), 2);

    assert!(!ctx.crawls().is_finished(crawl.id).await.unwrap());
    ctx.crawls().push_done(crawl.id, job_c).await.unwrap();
    assert!(ctx.crawls().is_finished(crawl.id).await.unwrap());
}

#[sqlx::test]
async fn cancelled_crawl_is_finished_regardless_of_children(pool: PgPool) {
    let ctx = ctx(pool);
    let crawl = sample_crawl(Uuid::new_v4());
    ctx.crawls().save_crawl(&crawl).await.unwrap();
    ctx.crawls().add_crawl_job(crawl.id, Uuid::new_v4()).await.unwrap();

    ctx.crawls().cancel(crawl.id).await.unwrap();
    assert!(ctx.crawls().is_finished(crawl.id).await.unwrap());
    assert!(ctx.crawls().is_finished_locked(crawl.id).await.unwrap());
}

#[sqlx::test]
async fn reap_expired_cascades_to_crawl_jobs(pool: PgPool) {
    let ctx = ctx(pool);
    let mut crawl = sample_crawl(Uuid::new_v4());
    crawl.expires_at = Utc::now() - chrono::Duration::minutes(1);
    ctx.crawls().save_crawl(&crawl).await.unwrap();
    ctx.crawls().add_crawl_job(crawl.id, Uuid::new_v4()).await.unwrap();

    let reaped = ctx.crawls().reap_expired().await.unwrap();
    assert_eq!(reaped, 1);
    assert_eq!(ctx.crawls().get_crawl_jobs(crawl.id).await.unwrap().len(), 0);
}

#[sqlx::test]
async fn mark_team_using_v0_is_idempotent(pool: PgPool) {
    let ctx = ctx(pool);
    ctx.crawls().mark_team_using_v0("team-1").await.unwrap();
    ctx.crawls().mark_team_using_v0("team-1").await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM teams_using_v0 WHERE team_id = $1")
        .bind("team-1")
        .fetch_one(ctx.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}
