//! Router wiring and ancillary health/status endpoints.

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    response::{Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::{collections::BTreeMap, time::Duration};
use ts_rs::TS;
use tower_http::{
    classify::ServerErrorsFailureClass,
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{Span, debug, trace, warn};

use crate::state::AppState;
use crate::status::ServiceStatus;
use crate::web::crawl;
use crate::web::dispatch;
use crate::web::progress;

/// Creates the web server router.
pub fn create_router(app_state: AppState) -> Router {
    let v0_router = Router::new()
        .route("/scrape", post(dispatch::scrape))
        .with_state(app_state.clone());

    let v1_router = Router::new()
        .route("/crawl", post(crawl::crawl))
        .route("/crawl/{job_id}", get(progress::stream_crawl))
        .with_state(app_state.clone());

    let ops_router = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(app_state);

    Router::new()
        .merge(v0_router)
        .nest("/v1", v1_router)
        .merge(ops_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer((
            CompressionLayer::new()
                .zstd(true)
                .br(true)
                .gzip(true)
                .quality(tower_http::CompressionLevel::Fastest),
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    tracing::debug_span!("request", path = request.uri().path())
                })
                .on_request(())
                .on_body_chunk(())
                .on_eos(())
                .on_response(
                    |response: &Response<Body>, latency: Duration, _span: &Span| {
                        let latency_threshold = if cfg!(debug_assertions) {
                            Duration::from_millis(100)
                        } else {
                            Duration::from_millis(1000)
                        };

                        let (latency_str, status) = (
                            format!("{latency:.2?}"),
                            format!(
                                "{} {}",
                                response.status().as_u16(),
                                response.status().canonical_reason().unwrap_or("??")
                            ),
                        );

                        if latency > latency_threshold {
                            warn!(latency = latency_str, status = status, "Response");
                        } else {
                            debug!(latency = latency_str, status = status, "Response");
                        }
                    },
                )
                .on_failure(
                    |error: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                        warn!(
                            error = ?error,
                            latency = format!("{latency:.2?}"),
                            "Request failed"
                        );
                    },
                ),
            TimeoutLayer::new(Duration::from_secs(120)),
        ))
}

/// Liveness endpoint.
async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    services: BTreeMap<String, ServiceInfo>,
}

/// Status endpoint reporting per-service health.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();

    for (name, svc_status) in state.service_statuses.all() {
        services.insert(
            name.clone(),
            ServiceInfo {
                name,
                status: svc_status,
            },
        );
    }

    let overall_status = if services
        .values()
        .any(|s| matches!(s.status, ServiceStatus::Error))
    {
        ServiceStatus::Error
    } else if services.is_empty() {
        ServiceStatus::Disabled
    } else {
        ServiceStatus::Active
    };

    Json(StatusResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        services,
    })
}
