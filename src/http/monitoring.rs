//! Private monitoring endpoints.
//!
//! Served on the monitoring port, never on the public one:
//! - `/healthz`: the process is up
//! - `/readyz`: the public surface accepts traffic
//! - `/metrics`: Prometheus text format, when a recorder is installed

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;

use crate::http::response::{json_with_code, ApiError};
use crate::lifecycle::LifecycleState;

#[derive(Clone)]
struct MonitoringState {
    lifecycle: watch::Receiver<LifecycleState>,
    metrics: Option<PrometheusHandle>,
}

pub fn router(lifecycle: watch::Receiver<LifecycleState>, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(render_metrics))
        .fallback(|| async { ApiError::not_found() })
        .with_state(MonitoringState { lifecycle, metrics })
}

async fn healthz() -> Response {
    json_with_code(StatusCode::OK, Some(serde_json::json!({ "status": "ok" })))
}

async fn readyz(State(state): State<MonitoringState>) -> Response {
    let current = *state.lifecycle.borrow();
    let code = if current.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_with_code(code, Some(serde_json::json!({ "status": current.as_str() })))
}

async fn render_metrics(State(state): State<MonitoringState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::not_found().into_response(),
    }
}
