//! Smoke test for the assembled router: health/status endpoints and the
//! content-type/Content-Length plumbing `routes::create_router` wires up.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use crawl_core::web::create_router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

#[sqlx::test]
async fn health_endpoint_reports_healthy(pool: PgPool) {
    let state = helpers::build_state(pool, vec![], None);
    let router = create_router(state);

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
}

#[sqlx::test]
async fn status_endpoint_reports_empty_registry_as_disabled(pool: PgPool) {
    let state = helpers::build_state(pool, vec![], None);
    let router = create_router(state);

    let response = router
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "disabled");
}

#[sqlx::test]
async fn unknown_route_is_not_found(pool: PgPool) {
    let state = helpers::build_state(pool, vec![], None);
    let router = create_router(state);

    let response = router
        .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
