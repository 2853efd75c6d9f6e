//! Startup orchestration and the ordered shutdown that follows it.
//!
//! # Responsibilities
//! - Bind the public and monitoring listeners
//! - Create the three closers and bind the public one to signals
//! - Serve until the public closer fires, then tear down in phases
//!
//! # Design Decisions
//! - Fail fast: any bind error is fatal and nothing stays listening
//! - Listeners are acquired in `bind`, traffic is served only from `run`
//! - The public drain is registered in `bind`, so a stop that lands before
//!   `run` still drains; `run` hands the serving task over through a oneshot
//! - Teardown phases run strictly one after the other:
//!   public (drain) → resources → private (monitoring) → flush logs
//! - Components get a [`Closer`] handle for their cleanup instead of
//!   registering on a process-wide one

use std::io;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{oneshot, watch};

use crate::config::ServerConfig;
use crate::http::{monitoring, public_router, HttpServer, RouterOptions, ServeError, ServingHandle};
use crate::lifecycle::shutdown::{BoxError, Closer, ShutdownReport};
use crate::lifecycle::signals::{self, ShutdownSignal};
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::net::{Listener, ListenerError};
use crate::observability::LogGuard;

const PUBLIC_ACTION: &str = "public http";

/// Slack on top of drain delay plus shutdown timeout before the public
/// drain action is reported as timed out.
const PUBLIC_DRAIN_SLACK: Duration = Duration::from_secs(1);

/// Startup errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid listen address '{host}': {source}")]
    Address {
        host: String,
        #[source]
        source: AddrParseError,
    },
    #[error("couldn't create {name} listener on {addr}: {source}")]
    Bind {
        name: &'static str,
        addr: SocketAddr,
        #[source]
        source: ListenerError,
    },
    #[error("couldn't install signal handlers: {0}")]
    Signals(#[from] io::Error),
}

/// Per-phase teardown reports returned by [`Server::run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub public: Arc<ShutdownReport>,
    pub resources: Arc<ShutdownReport>,
    pub private: Arc<ShutdownReport>,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.phases().iter().all(|report| report.is_clean())
    }

    pub fn phases(&self) -> [&Arc<ShutdownReport>; 3] {
        [&self.public, &self.resources, &self.private]
    }
}

/// Triggers the public closer from anywhere, same as a termination signal.
#[derive(Clone)]
pub struct StopHandle {
    public: Closer,
}

impl StopHandle {
    /// Returns `true` if this call started the shutdown.
    pub fn stop(&self) -> bool {
        self.public.trigger()
    }
}

/// A bound service, ready to [`run`](Server::run).
pub struct Server {
    config: ServerConfig,
    routes: Router,
    public: Closer,
    resources: Closer,
    private: Closer,
    public_listener: Option<(Listener, SocketAddr)>,
    /// Hands the running public server to the drain action.
    public_serving: Option<oneshot::Sender<ServingHandle>>,
    monitoring_listener: Option<(Listener, SocketAddr)>,
    public_addr: Option<SocketAddr>,
    monitoring_addr: Option<SocketAddr>,
    state: Arc<StateCell>,
    metrics: Option<PrometheusHandle>,
    log_guard: Option<LogGuard>,
}

impl Server {
    /// Bind listeners and bind the public closer to SIGINT and SIGTERM.
    pub async fn bind(config: ServerConfig, routes: Router) -> Result<Self, ServerError> {
        Self::bind_with_signals(config, routes, ShutdownSignal::TERMINATION).await
    }

    /// Like [`Server::bind`] with a custom signal set; an empty set leaves
    /// shutdown to [`StopHandle`].
    pub async fn bind_with_signals(
        config: ServerConfig,
        routes: Router,
        signals: &[ShutdownSignal],
    ) -> Result<Self, ServerError> {
        let state = Arc::new(StateCell::new());

        let public_listener = match config.http_port {
            Some(port) => Some(bind_listener("public", &config, port).await?),
            None => None,
        };
        let monitoring_listener = match config.monitoring_port {
            Some(port) => Some(bind_listener("monitoring", &config, port).await?),
            None => None,
        };

        let public = Closer::builder("public")
            .action_timeout(Some(
                config.drain_delay() + config.shutdown_timeout() + PUBLIC_DRAIN_SLACK,
            ))
            .build()?;
        let resources = Closer::builder("resources")
            .action_timeout(config.teardown_timeout())
            .build()?;
        let private = Closer::builder("private")
            .action_timeout(config.teardown_timeout())
            .build()?;

        let public_serving = if public_listener.is_some() {
            let (tx, rx) = oneshot::channel();
            register_drain(&public, Arc::clone(&state), config.drain_delay(), rx);
            Some(tx)
        } else {
            public.add_named(PUBLIC_ACTION, || async { Ok::<(), BoxError>(()) });
            None
        };
        signals::bind(&public, signals)?;

        if public_listener.is_some() {
            state.advance(LifecycleState::Listening);
        }

        Ok(Self {
            public_addr: public_listener.as_ref().map(|(_, addr)| *addr),
            monitoring_addr: monitoring_listener.as_ref().map(|(_, addr)| *addr),
            config,
            routes,
            public,
            resources,
            private,
            public_listener,
            public_serving,
            monitoring_listener,
            state,
            metrics: None,
            log_guard: None,
        })
    }

    /// Render this recorder on the monitoring port's `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Hold the log writer until teardown is complete.
    pub fn with_log_guard(mut self, guard: LogGuard) -> Self {
        self.log_guard = Some(guard);
        self
    }

    /// Actual public address, if a public listener is bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.public_addr
    }

    pub fn monitoring_addr(&self) -> Option<SocketAddr> {
        self.monitoring_addr
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            public: self.public.clone(),
        }
    }

    /// Closer fired right after the public drain.
    ///
    /// Register cleanup of pools, caches and workers here.
    pub fn resources(&self) -> Closer {
        self.resources.clone()
    }

    /// Closer fired last, after resources.
    pub fn private(&self) -> Closer {
        self.private.clone()
    }

    /// The signal-bound closer. Actions added here run alongside the drain.
    pub fn public(&self) -> Closer {
        self.public.clone()
    }

    /// Serve until the public closer fires, then tear everything down.
    pub async fn run(self) -> RunSummary {
        let Server {
            config,
            routes,
            public,
            resources,
            private,
            public_listener,
            public_serving,
            monitoring_listener,
            state,
            metrics,
            log_guard,
            ..
        } = self;

        if let Some((listener, addr)) = monitoring_listener {
            let router = monitoring::router(state.subscribe(), metrics);
            let serving = HttpServer::new("monitoring", listener, router, config.shutdown_timeout())
                .spawn(public.clone());
            private.add_named("monitoring http", move || async move {
                serving.shutdown().await.map(|_| ())
            });
            tracing::info!(address = %addr, "Serving monitoring endpoints");
        }

        let public_report = match (public_listener, public_serving) {
            (Some((listener, addr)), Some(public_serving)) => {
                let options = RouterOptions {
                    request_timeout: config.request_timeout(),
                    access_log: config.logging,
                };
                let router = public_router(routes, &options, state.subscribe());
                let serving = HttpServer::new("public", listener, router, config.shutdown_timeout())
                    .spawn(public.clone());
                if let Err(serving) = public_serving.send(serving) {
                    // The drain action is gone, so it timed out already.
                    let _ = serving.shutdown().await;
                }

                tracing::info!(address = %addr, "Serving public traffic");
                public.wait().await
            }
            _ => {
                tracing::info!("No public port configured, proceeding to teardown");
                public.close_all().await
            }
        };

        tracing::info!("Public phase done, closing resources");
        let resources_report = resources.close_all().await;

        tracing::info!("Closing private resources");
        let private_report = private.close_all().await;

        state.advance(LifecycleState::Stopped);

        let summary = RunSummary {
            public: public_report,
            resources: resources_report,
            private: private_report,
        };
        for report in summary.phases() {
            if !report.is_clean() {
                tracing::error!(
                    closer = %report.closer,
                    failed = report.failures.len(),
                    launched = report.launched,
                    "Teardown phase finished with failures"
                );
            }
        }
        tracing::info!(clean = summary.is_clean(), "Shutdown complete");

        drop(log_guard);
        summary
    }
}

/// Drain the public server once the public closer fires.
///
/// Enters `Draining` right away, waits out the drain delay, then stops the
/// server that `run` sends over. If `run` never started it there is
/// nothing left to drain.
fn register_drain(
    public: &Closer,
    state: Arc<StateCell>,
    drain_delay: Duration,
    serving: oneshot::Receiver<ServingHandle>,
) {
    public.add_named(PUBLIC_ACTION, move || async move {
        state.advance(LifecycleState::Draining);
        tracing::warn!(
            delay_ms = drain_delay.as_millis() as u64,
            "Public server: waiting for traffic to stop"
        );
        tokio::time::sleep(drain_delay).await;

        let Ok(serving) = serving.await else {
            tracing::warn!("Public server was never started");
            return Ok(());
        };
        tracing::warn!("Public server: shutting down");
        let stats = serving.shutdown().await?;
        tracing::warn!(
            open_at_stop = stats.open_at_stop,
            forced = stats.forced,
            "Public server: stopped"
        );
        Ok::<(), ServeError>(())
    });
}

async fn bind_listener(
    name: &'static str,
    config: &ServerConfig,
    port: u16,
) -> Result<(Listener, SocketAddr), ServerError> {
    let addr = config.socket_addr(port).map_err(|source| ServerError::Address {
        host: config.host.clone(),
        source,
    })?;
    let listener = Listener::bind(addr, config.max_connections)
        .await
        .map_err(|source| ServerError::Bind { name, addr, source })?;
    let local = listener.local_addr().map_err(|e| ServerError::Bind {
        name,
        addr,
        source: ListenerError::Bind(e),
    })?;
    Ok((listener, local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown::TeardownError;

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            http_port: None,
            monitoring_port: None,
            drain_delay_ms: 0,
            shutdown_timeout_ms: 500,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn without_public_port_state_stays_initialized() {
        let server = Server::bind_with_signals(config(), Router::new(), &[]).await.unwrap();
        assert_eq!(server.current_state(), LifecycleState::Initialized);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn bound_public_port_is_listening() {
        let server = Server::bind_with_signals(
            ServerConfig {
                http_port: Some(0),
                ..config()
            },
            Router::new(),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(*server.state().borrow(), LifecycleState::Listening);
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn bad_host_is_an_address_error() {
        let result = Server::bind_with_signals(
            ServerConfig {
                host: "localhost:80".into(),
                http_port: Some(0),
                ..config()
            },
            Router::new(),
            &[],
        )
        .await;
        assert!(matches!(result, Err(ServerError::Address { .. })));
    }

    #[tokio::test]
    async fn stop_handle_triggers_public_once() {
        let server = Server::bind_with_signals(config(), Router::new(), &[]).await.unwrap();
        let handle = server.stop_handle();
        assert!(handle.stop());
        assert!(!handle.clone().stop());
        assert!(server.public().is_fired());
    }

    #[tokio::test]
    async fn fatal_accept_error_drains_and_is_reported() {
        let server = Server::bind_with_signals(
            ServerConfig {
                http_port: Some(0),
                drain_delay_ms: 100,
                ..config()
            },
            Router::new(),
            &[],
        )
        .await
        .unwrap();
        if let Some((listener, _)) = &server.public_listener {
            listener.close();
        }

        let public = server.public();
        let mut state = server.state();
        let draining = tokio::spawn(async move {
            state
                .wait_for(|s| *s >= LifecycleState::Draining)
                .await
                .map(|s| *s)
        });

        let summary = tokio::time::timeout(Duration::from_secs(2), server.run())
            .await
            .expect("accept failure did not stop the server");

        assert!(public.is_fired());
        assert_eq!(draining.await.unwrap().unwrap(), LifecycleState::Draining);
        assert_eq!(summary.public.launched, 1);
        let failure = &summary.public.failures[0];
        assert_eq!(failure.name.as_deref(), Some(PUBLIC_ACTION));
        assert!(matches!(
            &failure.error,
            TeardownError::Failed(message) if message.contains("stopped accepting")
        ));
    }
}
