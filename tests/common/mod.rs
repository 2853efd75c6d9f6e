//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use service_scaffold::config::ServerConfig;
use service_scaffold::LifecycleState;
use tokio::sync::watch;

/// Loopback config with an ephemeral public port, no monitoring port and
/// no drain delay.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        http_port: Some(0),
        monitoring_port: None,
        drain_delay_ms: 0,
        shutdown_timeout_ms: 1_000,
        teardown_timeout_ms: 5_000,
        ..ServerConfig::default()
    }
}

/// A client that opens a fresh connection per request.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// Wait until the lifecycle reaches `target` or fail after `limit`.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<LifecycleState>,
    target: LifecycleState,
    limit: Duration,
) {
    tokio::time::timeout(limit, rx.wait_for(|state| *state >= target))
        .await
        .unwrap_or_else(|_| panic!("state did not reach {target} within {limit:?}"))
        .unwrap();
}
