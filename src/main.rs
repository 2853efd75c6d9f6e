//! Service scaffold
//!
//! Runs an HTTP service with an ordered, signal-driven shutdown.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                 SERVICE SCAFFOLD                  │
//!                    │                                                   │
//!   Public traffic   │  ┌─────────┐    ┌──────────┐    ┌──────────────┐  │
//!   ─────────────────┼─▶│   net   │───▶│   http   │───▶│  app routes  │  │
//!                    │  │listener │    │  server  │    │  under /api  │  │
//!                    │  └─────────┘    └──────────┘    └──────────────┘  │
//!                    │                                                   │
//!   Monitoring       │  ┌─────────┐    ┌──────────────────────────────┐  │
//!   ─────────────────┼─▶│   net   │───▶│ /healthz /readyz /metrics    │  │
//!                    │  └─────────┘    └──────────────────────────────┘  │
//!                    │                                                   │
//!   SIGTERM/SIGINT   │  ┌──────────────────────────────────────────────┐ │
//!   ─────────────────┼─▶│ lifecycle: public → resources → private      │ │
//!                    │  └──────────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use axum::Router;
use clap::Parser;

use service_scaffold::config::{load_config, CONFIG_FILE_ENV};
use service_scaffold::lifecycle::Server;
use service_scaffold::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "service-scaffold", version, about = "HTTP service with ordered graceful shutdown")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, env = CONFIG_FILE_ENV)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let log_guard = logging::init(&config.log_config())?;

    tracing::info!(
        app = %config.app.name,
        env = %config.app.env,
        version = env!("CARGO_PKG_VERSION"),
        "Starting"
    );

    let recorder = if config.observability.metrics_enabled {
        metrics::install_recorder()
            .map_err(|e| tracing::error!(error = %e, "Metrics disabled"))
            .ok()
    } else {
        None
    };

    let mut server = Server::bind(config.server.clone(), Router::new()).await?;
    if let Some(handle) = recorder {
        server = server.with_metrics(handle);
    }

    tracing::info!(
        public = ?server.local_addr(),
        monitoring = ?server.monitoring_addr(),
        "Listeners bound"
    );

    // Failures are logged by `run` before the writer is flushed.
    server.with_log_guard(log_guard).run().await;
    Ok(())
}
