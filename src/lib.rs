//! HTTP service scaffold with an ordered, signal-driven graceful shutdown.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::AppConfig;
pub use lifecycle::{Closer, LifecycleState, RunSummary, Server, ServerError, ShutdownSignal, StopHandle};
