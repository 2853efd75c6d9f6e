//! HTTP server setup and serving.
//!
//! # Responsibilities
//! - Create the public Axum Router (status route, application routes)
//! - Wire up middleware (request ID, access log, CORS, timeout, panics)
//! - Run the accept loop on a bounded listener
//! - Drain on request: stop accepting, disable keep-alive, wait for
//!   in-flight requests up to the shutdown timeout, cut off the rest
//!
//! # Design Decisions
//! - Connections are served by hyper directly so shutdown can reach each
//!   one: graceful first, abort once the timeout expires
//! - An accept error that is not caused by a single peer triggers the
//!   public closer, same as a termination signal

use std::any::Any;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use hyper::server::conn::http1;
use hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown, service::TowerToHyperService};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::http::request::{track_requests, UuidRequestId};
use crate::http::response::{json_with_code, ApiError, ErrorDetail};
use crate::lifecycle::{Closer, LifecycleState};
use crate::net::{ConnectionTracker, Listener, ListenerError};

/// Serving errors.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("{server} server stopped accepting: {source}")]
    Accept {
        server: &'static str,
        #[source]
        source: ListenerError,
    },
    #[error("{0} server task ended without reporting")]
    Gone(&'static str),
}

/// What a drain had to deal with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Connections open when accepting stopped.
    pub open_at_stop: u64,
    /// Connections still open at the deadline and aborted.
    pub forced: u64,
}

/// Options for the public router.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub request_timeout: Duration,
    /// Emit one log line per request.
    pub access_log: bool,
}

/// Build the public router.
///
/// Application routes and the built-in `/status` are nested under `/api`.
#[allow(deprecated)]
pub fn public_router(
    routes: Router,
    options: &RouterOptions,
    lifecycle: watch::Receiver<LifecycleState>,
) -> Router {
    let api = Router::new()
        .route("/status", get(status))
        .with_state(lifecycle)
        .merge(routes);

    let router = Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(axum::middleware::from_fn(track_requests))
        .layer(TimeoutLayer::new(options.request_timeout))
        .layer(cors());

    let router = if options.access_log {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };

    router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([
            Method::HEAD,
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(AnyOrigin)
}

/// Liveness of the public surface; 503 once draining has begun.
async fn status(State(lifecycle): State<watch::Receiver<LifecycleState>>) -> Response {
    let current = *lifecycle.borrow();
    let code = if current.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let mut response = json_with_code(code, Some(serde_json::json!({ "status": current.as_str() })));
    response
        .headers_mut()
        .insert("x-force", HeaderValue::from_static("with-you"));
    response
}

async fn not_found(method: Method, uri: Uri, headers: HeaderMap) -> ApiError {
    ApiError::not_found()
        .with_request_id(&headers)
        .with_details(vec![ErrorDetail {
            field: Some("path".into()),
            message: Some(format!("no route for {method} {}", uri.path())),
            ..Default::default()
        }])
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    tracing::error!(panic = %message, "Request handler panicked");
    ApiError::internal().into_response()
}

/// An HTTP server bound to a listener, not yet accepting.
pub struct HttpServer {
    name: &'static str,
    listener: Listener,
    router: Router,
    shutdown_timeout: Duration,
}

impl HttpServer {
    pub fn new(name: &'static str, listener: Listener, router: Router, shutdown_timeout: Duration) -> Self {
        Self {
            name,
            listener,
            router,
            shutdown_timeout,
        }
    }

    /// Start accepting on a background task.
    ///
    /// A fatal accept error triggers `on_failure`.
    pub fn spawn(self, on_failure: Closer) -> ServingHandle {
        let name = self.name;
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = self.serve(stop_rx, on_failure).await;
            let _ = done_tx.send(result);
        });

        ServingHandle {
            name,
            stop: stop_tx,
            done: done_rx,
        }
    }

    async fn serve(
        self,
        mut stop: oneshot::Receiver<()>,
        on_failure: Closer,
    ) -> Result<DrainStats, ServeError> {
        let HttpServer {
            name,
            listener,
            router,
            shutdown_timeout,
        } = self;

        let graceful = GracefulShutdown::new();
        let tracker = ConnectionTracker::new(name);
        let mut connections = JoinSet::new();
        let mut http = http1::Builder::new();
        http.keep_alive(true);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                server = name,
                address = %addr,
                max_connections = listener.max_connections(),
                "HTTP server starting"
            );
        }

        let failure = loop {
            tokio::select! {
                // Also fires when the handle is dropped.
                _ = &mut stop => break None,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => {
                    let (stream, peer_addr, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) if e.is_transient() => {
                            tracing::debug!(server = name, error = %e, "Transient accept error");
                            continue;
                        }
                        Err(source) => break Some(ServeError::Accept { server: name, source }),
                    };

                    let service = TowerToHyperService::new(router.clone());
                    let conn = graceful.watch(http.serve_connection(TokioIo::new(stream), service));
                    let guard = tracker.track();

                    connections.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = conn.await {
                            tracing::debug!(
                                connection_id = %guard.id(),
                                peer_addr = %peer_addr,
                                error = %e,
                                "Connection ended with error"
                            );
                        }
                    });
                }
            }
        };

        if let Some(e) = &failure {
            tracing::error!(server = name, error = %e, "Serving failed, triggering shutdown");
            on_failure.trigger();
            // Keep in-flight requests alive until the lifecycle asks for the drain.
            let _ = stop.await;
        }

        drop(listener);
        let open_at_stop = tracker.active_count();
        tracing::info!(
            server = name,
            open_connections = open_at_stop,
            timeout_ms = shutdown_timeout.as_millis() as u64,
            "Draining connections"
        );

        let forced = match tokio::time::timeout(shutdown_timeout, graceful.shutdown()).await {
            Ok(()) => 0,
            Err(_) => {
                let forced = tracker.active_count();
                tracing::warn!(
                    server = name,
                    forced,
                    "Shutdown timeout expired, closing remaining connections"
                );
                connections.abort_all();
                forced
            }
        };
        while connections.join_next().await.is_some() {}

        tracing::info!(server = name, "HTTP server stopped");
        match failure {
            Some(e) => Err(e),
            None => Ok(DrainStats { open_at_stop, forced }),
        }
    }
}

/// Handle to a running server.
///
/// Dropping it stops the server the same way [`ServingHandle::shutdown`] does.
#[derive(Debug)]
pub struct ServingHandle {
    name: &'static str,
    stop: oneshot::Sender<()>,
    done: oneshot::Receiver<Result<DrainStats, ServeError>>,
}

impl ServingHandle {
    /// Stop accepting, drain, and wait for the accept loop to finish.
    pub async fn shutdown(self) -> Result<DrainStats, ServeError> {
        let _ = self.stop.send(());
        let name = self.name;
        self.done
            .await
            .unwrap_or_else(|_| Err(ServeError::Gone(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router(state: LifecycleState) -> Router {
        let (_tx, rx) = watch::channel(state);
        let options = RouterOptions {
            request_timeout: Duration::from_secs(5),
            access_log: false,
        };
        let routes = Router::new()
            .route("/v1/echo", get(|| async { "echo" }))
            .route(
                "/v1/panic",
                get(|| async {
                    if std::hint::black_box(true) {
                        panic!("handler exploded");
                    }
                    "unreachable"
                }),
            );
        public_router(routes, &options, rx)
    }

    #[tokio::test]
    async fn status_reports_listening() {
        let response = router(LifecycleState::Listening)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-force"], "with-you");
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn status_is_unavailable_while_draining() {
        let response = router(LifecycleState::Draining)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn application_routes_live_under_api() {
        let response = router(LifecycleState::Listening)
            .oneshot(Request::get("/api/v1/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_gets_json_404_with_debug_id() {
        let response = router(LifecycleState::Listening)
            .oneshot(
                Request::get("/nope")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-request-id"], "abc-123");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["meta"]["code"], 404);
        assert_eq!(body["meta"]["debug_id"], "abc-123");
        assert_eq!(body["meta"]["errors"][0]["field"], "path");
        assert_eq!(body["meta"]["errors"][0]["message"], "no route for GET /nope");
    }

    #[tokio::test]
    async fn handler_panic_becomes_500() {
        let response = router(LifecycleState::Listening)
            .oneshot(Request::get("/api/v1/panic").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn fatal_accept_error_triggers_on_failure_and_is_returned() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), 4).await.unwrap();
        listener.close();

        let on_failure = Closer::new("public");
        let serving = HttpServer::new("public", listener, Router::new(), Duration::from_millis(100))
            .spawn(on_failure.clone());

        tokio::time::timeout(Duration::from_secs(1), on_failure.wait())
            .await
            .expect("accept failure did not trigger the closer");

        let result = serving.shutdown().await;
        assert!(matches!(
            result,
            Err(ServeError::Accept {
                server: "public",
                source: ListenerError::Closed,
            })
        ));
    }
}
