//! Configuration loading from disk and environment.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, environment
//! variables. A dotted key maps to its upper-snake form, so `server.http_port`
//! is overridden by `SERVER_HTTP_PORT`. An empty variable unsets the key.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming the config file when no path is passed.
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

const UNKNOWN: &str = "unknown";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("environment variable {var}='{value}' is not a valid {expected}")]
    Env {
        var: String,
        value: String,
        expected: &'static str,
    },
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Str,
    Int,
    Bool,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Str => "string",
            Kind::Int => "integer",
            Kind::Bool => "boolean",
        }
    }
}

/// Keys that can be overridden from the environment.
const OVERRIDABLE: &[(&str, Kind)] = &[
    ("app.name", Kind::Str),
    ("app.env", Kind::Str),
    ("app.log_level", Kind::Str),
    ("server.host", Kind::Str),
    ("server.http_port", Kind::Int),
    ("server.monitoring_port", Kind::Int),
    ("server.max_connections", Kind::Int),
    ("server.request_timeout_secs", Kind::Int),
    ("server.drain_delay_ms", Kind::Int),
    ("server.shutdown_timeout_ms", Kind::Int),
    ("server.teardown_timeout_ms", Kind::Int),
    ("server.logging", Kind::Bool),
    ("observability.log_format", Kind::Str),
    ("observability.metrics_enabled", Kind::Bool),
];

/// `server.http_port` → `SERVER_HTTP_PORT`.
pub fn env_var_for(key: &str) -> String {
    key.replace('.', "_").to_ascii_uppercase()
}

/// Load, override from the process environment, and validate.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    load_config_with(path, |var| std::env::var(var).ok())
}

/// Same as [`load_config`] with an explicit environment lookup.
pub fn load_config_with<E>(path: Option<&Path>, env: E) -> Result<AppConfig, ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    let mut table = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            content.parse::<toml::Table>()?
        }
        None => toml::Table::new(),
    };

    apply_env_overrides(&mut table, &env)?;

    let mut config: AppConfig = toml::Value::Table(table).try_into()?;
    resolve_identity(&mut config, &env);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn apply_env_overrides<E>(table: &mut toml::Table, env: &E) -> Result<(), ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    for &(key, kind) in OVERRIDABLE {
        let var = env_var_for(key);
        let Some(raw) = env(&var) else { continue };
        let Some((section, field)) = key.split_once('.') else { continue };

        let section = table
            .entry(section)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        // A non-table section is reported by deserialization.
        let Some(section) = section.as_table_mut() else { continue };

        if raw.is_empty() {
            section.remove(field);
            continue;
        }

        let value = match kind {
            Kind::Str => Some(toml::Value::String(raw.clone())),
            Kind::Int => raw.parse::<i64>().ok().map(toml::Value::Integer),
            Kind::Bool => raw.parse::<bool>().ok().map(toml::Value::Boolean),
        };
        let Some(value) = value else {
            return Err(ConfigError::Env {
                var,
                value: raw,
                expected: kind.name(),
            });
        };

        tracing::debug!(key, var = %var, "Config value overridden from environment");
        section.insert(field.to_string(), value);
    }
    Ok(())
}

fn resolve_identity<E>(config: &mut AppConfig, env: &E)
where
    E: Fn(&str) -> Option<String>,
{
    if config.app.name.is_empty() {
        config.app.name = UNKNOWN.to_string();
    }
    if config.app.env.is_empty() {
        config.app.env = env("ENVIRONMENT_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());
    }
}
