//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind listeners → Create closers → Bind signals → Serve
//!
//! Shutdown (shutdown.rs):
//!     Public closer fires → Drain delay → Stop accepting → Drain connections
//!     → Resources closer → Private closer → Flush logs
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger the public closer
//!     Second signal  → Immediate exit, until the closer is dropped
//!
//! State (state.rs):
//!     Initialized → Listening → Draining → Stopped
//! ```
//!
//! # Design Decisions
//! - A closer fires exactly once; late registrations are dropped
//! - Ordered shutdown: public traffic first, private resources last
//! - Every teardown action is bounded so one hung action can't stall the process

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use shutdown::{
    BoxError, Closer, CloserBuilder, ShutdownReport, TeardownAction, TeardownError,
    TeardownFailure, DEFAULT_ACTION_TIMEOUT,
};
pub use signals::ShutdownSignal;
pub use startup::{RunSummary, Server, ServerError, StopHandle};
pub use state::LifecycleState;
