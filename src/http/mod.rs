//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (bounded listener)
//!     → server.rs (hyper connection, graceful drain)
//!     → request.rs (request ID, request metrics)
//!     → application routes under /api
//!     → response.rs (JSON payloads, error envelope)
//!     → Send to client
//!
//! Monitoring port:
//!     → monitoring.rs (/healthz, /readyz, /metrics)
//! ```

pub mod monitoring;
pub mod request;
pub mod response;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use response::{json_with_code, ApiError, ErrorBody, ErrorDetail};
pub use server::{public_router, DrainStats, HttpServer, RouterOptions, ServeError, ServingHandle};
