//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default, so an empty file (or no file) is valid.

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::{LogConfig, LogFormat};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Service identity.
    pub app: AppSection,

    /// Listeners and shutdown timing.
    pub server: ServerConfig,

    /// Log output and metrics.
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.app.log_level.clone(),
            format: self.observability.log_format,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub env: String,
    /// Filter directive, e.g. `info` or `info,hyper=warn`.
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: String::new(),
            env: String::new(),
            log_level: "info".to_string(),
        }
    }
}

/// Listener and shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface both listeners bind to.
    pub host: String,

    /// Public port. No public listener when unset; `0` picks a free port.
    pub http_port: Option<u16>,

    /// Private monitoring port. No monitoring listener when unset.
    pub monitoring_port: Option<u16>,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,

    /// Per-request timeout on the public router.
    pub request_timeout_secs: u64,

    /// Time between the shutdown signal and closing the public listener,
    /// for load balancers to notice the failing readiness probe.
    pub drain_delay_ms: u64,

    /// Upper bound for in-flight requests to finish once draining.
    pub shutdown_timeout_ms: u64,

    /// Upper bound for each teardown action. `0` disables the bound.
    pub teardown_timeout_ms: u64,

    /// Log every public request.
    pub logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: None,
            monitoring_port: Some(8081),
            max_connections: 10_000,
            request_timeout_secs: 60,
            drain_delay_ms: 5_000,
            shutdown_timeout_ms: 10_000,
            teardown_timeout_ms: 30_000,
            logging: false,
        }
    }
}

impl ServerConfig {
    pub fn ip(&self) -> Result<IpAddr, AddrParseError> {
        self.host.parse()
    }

    pub fn socket_addr(&self, port: u16) -> Result<SocketAddr, AddrParseError> {
        Ok(SocketAddr::new(self.ip()?, port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Option<Duration> {
        match self.teardown_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,

    /// Install the Prometheus recorder and expose `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.http_port, None);
        assert_eq!(config.server.monitoring_port, Some(8081));
        assert_eq!(config.server.drain_delay(), Duration::from_secs(5));
        assert_eq!(config.server.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn zero_teardown_timeout_is_unbounded() {
        let config: ServerConfig = toml::from_str("teardown_timeout_ms = 0").unwrap();
        assert_eq!(config.teardown_timeout(), None);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            http_port = 8080

            [observability]
            log_format = "pretty"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.http_port, Some(8080));
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(config.observability.metrics_enabled);
    }
}
