//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, connection limit > 0)
//! - Detect listeners that would collide on the same port
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use tracing_subscriber::EnvFilter;

use crate::config::schema::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("server.host '{0}' is not an IP address")]
    InvalidHost(String),
    #[error("server.http_port and server.monitoring_port are both {0}")]
    PortConflict(u16),
    #[error("server.max_connections must be greater than zero")]
    ZeroMaxConnections,
    #[error("server.request_timeout_secs must be greater than zero")]
    ZeroRequestTimeout,
    #[error("server.shutdown_timeout_ms must be greater than zero")]
    ZeroShutdownTimeout,
    #[error("app.log_level '{0}' is not a valid filter")]
    InvalidLogLevel(String),
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let server = &config.server;

    if server.ip().is_err() {
        errors.push(ValidationError::InvalidHost(server.host.clone()));
    }

    // Port 0 is ephemeral on both sides and never collides.
    if let (Some(public), Some(monitoring)) = (server.http_port, server.monitoring_port) {
        if public != 0 && public == monitoring {
            errors.push(ValidationError::PortConflict(public));
        }
    }

    if server.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }
    if server.shutdown_timeout_ms == 0 {
        errors.push(ValidationError::ZeroShutdownTimeout);
    }

    if EnvFilter::try_new(&config.app.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(config.app.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
