use crate::logging;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use oxport_registry::MetricStore;
use std::sync::Arc;

/// Content type of the Prometheus text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn build_app(store: Arc<MetricStore>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/live", get(probe))
        .route("/livez", get(probe))
        .route("/ready", get(probe))
        .route("/readyz", get(probe))
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(store)
}

async fn metrics(State(store): State<Arc<MetricStore>>) -> Response {
    match store.render() {
        Ok(body) => ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response()
        }
    }
}

/// Liveness and readiness do not depend on collector health.
async fn probe() -> &'static str {
    "OK"
}
