//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lifecycle_teardown_actions_total` (counter): teardown outcomes by closer
//! - `lifecycle_state` (gauge): 0=initialized 1=listening 2=draining 3=stopped
//! - `http_connections_active` (gauge): open connections per listener
//! - `http_requests_total` (counter): public requests by status
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed, so library code and tests never need one
//! - The Prometheus recorder is rendered by the private monitoring server

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::lifecycle::LifecycleState;

pub const TEARDOWN_ACTIONS_TOTAL: &str = "lifecycle_teardown_actions_total";
pub const LIFECYCLE_STATE: &str = "lifecycle_state";
pub const ACTIVE_CONNECTIONS: &str = "http_connections_active";
pub const REQUESTS_TOTAL: &str = "http_requests_total";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install metrics recorder: {0}")]
    Install(#[from] BuildError),
}

/// Install the process-wide Prometheus recorder.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

pub fn record_teardown(closer: &str, outcome: &'static str) {
    ::metrics::counter!(
        TEARDOWN_ACTIONS_TOTAL,
        "closer" => closer.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_lifecycle_state(state: LifecycleState) {
    ::metrics::gauge!(LIFECYCLE_STATE).set(state as u8 as f64);
}

pub fn set_active_connections(listener: &'static str, active: u64) {
    ::metrics::gauge!(ACTIVE_CONNECTIONS, "listener" => listener).set(active as f64);
}

pub fn record_request(status: u16) {
    ::metrics::counter!(REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
}
