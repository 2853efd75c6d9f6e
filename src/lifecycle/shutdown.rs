//! One-shot teardown coordination.
//!
//! # Responsibilities
//! - Collect teardown actions registered by any component
//! - Fire them exactly once, concurrently, on the first trigger
//! - Release every waiter once all actions have returned
//! - Report failures without letting them escape
//!
//! # State Machine
//! ```text
//! Pending(actions) ──trigger()──▶ Firing ──all actions returned──▶ Done
//!        ▲                          │
//!        └── add() appends          └── add() is dropped from here on
//! ```
//!
//! # Design Decisions
//! - State enum under a mutex decides who fires; no separate "fired" flag
//! - Completion is a watch channel holding the report, so late waiters
//!   observe it without racing the sender
//! - Each action runs in its own task: a panic or hang stays contained
//! - An action that outlives `action_timeout` is detached, not cancelled

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::lifecycle::signals::{self, ShutdownSignal};
use crate::observability::metrics;

/// Error type returned by teardown actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Default upper bound on how long the coordinator waits for one action.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

type ActionFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// A zero-argument, fallible unit of cleanup work.
pub struct TeardownAction {
    name: Option<String>,
    run: ActionFn,
}

impl TeardownAction {
    /// Wrap an async closure as a teardown action.
    pub fn new<F, Fut, E>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            name: None,
            run: Box::new(move || f().map(|res| res.map_err(Into::<BoxError>::into)).boxed()),
        }
    }

    /// Attach a name used in logs and in the shutdown report.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Debug for TeardownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownAction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Why a single teardown action did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TeardownError {
    #[error("action failed: {0}")]
    Failed(String),
    #[error("action panicked: {0}")]
    Panicked(String),
    #[error("action did not finish within {0:?}")]
    TimedOut(Duration),
}

impl TeardownError {
    fn outcome(&self) -> &'static str {
        match self {
            TeardownError::Failed(_) => "failed",
            TeardownError::Panicked(_) => "panicked",
            TeardownError::TimedOut(_) => "timed_out",
        }
    }
}

/// A failed action together with its registration position.
#[derive(Debug, Clone)]
pub struct TeardownFailure {
    /// Position among the actions captured at firing time.
    pub index: usize,
    pub name: Option<String>,
    pub error: TeardownError,
}

/// Aggregated outcome of one firing.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Name of the closer that fired.
    pub closer: String,
    /// Number of actions launched.
    pub launched: usize,
    /// Actions that failed, panicked or timed out.
    pub failures: Vec<TeardownFailure>,
    /// Time between the trigger and the last outcome.
    pub elapsed: Duration,
    /// Instant at which waiters were released.
    pub completed_at: Instant,
}

impl ShutdownReport {
    pub fn succeeded(&self) -> usize {
        self.launched - self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum State {
    Pending(Vec<TeardownAction>),
    Firing,
    Done,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    done: watch::Sender<Option<Arc<ShutdownReport>>>,
    runtime: Handle,
    action_timeout: Option<Duration>,
}

/// Concurrency-safe, idempotent shutdown coordinator.
///
/// Cloning yields another handle to the same coordinator, so it can be
/// passed down to every component that owns something to clean up.
///
/// ```ignore
/// let closer = Closer::new("resources");
/// closer.add(|| async { pool.close().await });
/// // ... later, from anywhere:
/// closer.trigger();
/// closer.wait().await;
/// ```
#[derive(Clone)]
pub struct Closer {
    inner: Arc<Inner>,
}

impl Closer {
    /// Create an unbound closer with the default action timeout.
    ///
    /// Must be called from within a Tokio runtime; firing happens on that
    /// runtime even when `trigger` is called from a foreign thread.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_parts(name.into(), Some(DEFAULT_ACTION_TIMEOUT), Handle::current())
    }

    /// Create a closer that triggers itself on the first of `signals`.
    pub fn with_signals(name: impl Into<String>, signals: &[ShutdownSignal]) -> io::Result<Self> {
        Self::builder(name).signals(signals).build()
    }

    pub fn builder(name: impl Into<String>) -> CloserBuilder {
        CloserBuilder {
            name: name.into(),
            action_timeout: Some(DEFAULT_ACTION_TIMEOUT),
            signals: Vec::new(),
        }
    }

    fn from_parts(name: String, action_timeout: Option<Duration>, runtime: Handle) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(State::Pending(Vec::new())),
                done,
                runtime,
                action_timeout,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register an async cleanup closure.
    pub fn add<F, Fut, E>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.extend([TeardownAction::new(f)]);
    }

    /// Register an async cleanup closure under a name.
    pub fn add_named<F, Fut, E>(&self, name: impl Into<String>, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.extend([TeardownAction::new(f).named(name)]);
    }

    /// Register zero or more actions.
    ///
    /// Once firing has started the actions are dropped without running.
    pub fn extend(&self, actions: impl IntoIterator<Item = TeardownAction>) {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Pending(pending) => pending.extend(actions),
            State::Firing | State::Done => {
                let dropped: Vec<String> = actions
                    .into_iter()
                    .map(|action| action.name().unwrap_or("unnamed").to_owned())
                    .collect();
                if !dropped.is_empty() {
                    tracing::debug!(
                        closer = %self.inner.name,
                        ?dropped,
                        "Closer already fired, ignoring late teardown actions"
                    );
                }
            }
        }
    }

    /// Start firing if nobody has yet.
    ///
    /// Returns `true` for the single call that started firing. Never
    /// blocks; use [`Closer::wait`] to observe completion.
    pub fn trigger(&self) -> bool {
        let actions = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut *state, State::Firing) {
                State::Pending(actions) => actions,
                previous => {
                    *state = previous;
                    return false;
                }
            }
        };

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(inner.fire(actions));
        true
    }

    /// Suspend until firing has completed and return its report.
    pub async fn wait(&self) -> Arc<ShutdownReport> {
        let mut rx = self.inner.done.subscribe();
        let report = rx.wait_for(Option::is_some).await.map(|report| (*report).clone());
        match report {
            Ok(Some(report)) => report,
            // The sender lives inside `self.inner`.
            _ => unreachable!("completion sender dropped while closer is alive"),
        }
    }

    /// Trigger and wait.
    pub async fn close_all(&self) -> Arc<ShutdownReport> {
        self.trigger();
        self.wait().await
    }

    /// Whether firing has started.
    pub fn is_fired(&self) -> bool {
        !matches!(&*self.inner.state.lock(), State::Pending(_))
    }

    /// Number of actions waiting for the trigger.
    pub fn pending(&self) -> usize {
        match &*self.inner.state.lock() {
            State::Pending(actions) => actions.len(),
            State::Firing | State::Done => 0,
        }
    }

    /// The firing report, once available.
    pub fn report(&self) -> Option<Arc<ShutdownReport>> {
        self.inner.done.borrow().clone()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// A handle that does not keep the closer alive.
    pub(crate) fn downgrade(&self) -> WeakCloser {
        WeakCloser {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Resolves once every handle to this closer has been dropped.
    pub(crate) fn released(&self) -> BoxFuture<'static, ()> {
        let mut done = self.inner.done.subscribe();
        async move { while done.changed().await.is_ok() {} }.boxed()
    }
}

/// Non-owning handle held by signal listeners.
pub(crate) struct WeakCloser {
    inner: Weak<Inner>,
}

impl WeakCloser {
    pub(crate) fn upgrade(&self) -> Option<Closer> {
        self.inner.upgrade().map(|inner| Closer { inner })
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("name", &self.inner.name)
            .field("fired", &self.is_fired())
            .finish()
    }
}

impl Inner {
    async fn fire(self: Arc<Self>, actions: Vec<TeardownAction>) {
        let started = Instant::now();
        let launched = actions.len();
        tracing::info!(closer = %self.name, actions = launched, "Running teardown actions");

        let outcomes = join_all(
            actions
                .into_iter()
                .enumerate()
                .map(|(index, action)| self.run_action(index, action)),
        )
        .await;

        let failures: Vec<TeardownFailure> = outcomes.into_iter().filter_map(Result::err).collect();
        let report = ShutdownReport {
            closer: self.name.clone(),
            launched,
            failures,
            elapsed: started.elapsed(),
            completed_at: Instant::now(),
        };

        tracing::info!(
            closer = %self.name,
            succeeded = report.succeeded(),
            failed = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Teardown complete"
        );

        *self.state.lock() = State::Done;
        self.done.send_replace(Some(Arc::new(report)));
    }

    async fn run_action(&self, index: usize, action: TeardownAction) -> Result<(), TeardownFailure> {
        let TeardownAction { name, run } = action;
        // The closure itself is invoked inside the task so a panic while
        // building the future is caught too.
        let task = self.runtime.spawn(async move { run().await });

        let joined = match self.action_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => return Err(self.failed(index, name, TeardownError::TimedOut(limit))),
            },
            None => task.await,
        };

        let error = match joined {
            Ok(Ok(())) => {
                metrics::record_teardown(&self.name, "ok");
                return Ok(());
            }
            Ok(Err(e)) => TeardownError::Failed(e.to_string()),
            Err(e) if e.is_panic() => TeardownError::Panicked(panic_message(e.into_panic())),
            Err(e) => TeardownError::Failed(e.to_string()),
        };
        Err(self.failed(index, name, error))
    }

    fn failed(&self, index: usize, name: Option<String>, error: TeardownError) -> TeardownFailure {
        tracing::error!(
            closer = %self.name,
            action = name.as_deref().unwrap_or("unnamed"),
            index,
            error = %error,
            "Teardown action failed"
        );
        metrics::record_teardown(&self.name, error.outcome());
        TeardownFailure { index, name, error }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for closers that need a custom timeout or a signal binding.
#[derive(Debug)]
pub struct CloserBuilder {
    name: String,
    action_timeout: Option<Duration>,
    signals: Vec<ShutdownSignal>,
}

impl CloserBuilder {
    /// Bound on each action's runtime; `None` waits indefinitely.
    pub fn action_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// OS signals that trigger the closer.
    pub fn signals(mut self, signals: &[ShutdownSignal]) -> Self {
        self.signals = signals.to_vec();
        self
    }

    /// Build the closer, installing signal handlers before returning.
    pub fn build(self) -> io::Result<Closer> {
        let closer = Closer::from_parts(self.name, self.action_timeout, Handle::current());
        signals::bind(&closer, &self.signals)?;
        Ok(closer)
    }
}
