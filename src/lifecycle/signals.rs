//! OS signal handling.
//!
//! # Responsibilities
//! - Subscribe to termination signals on behalf of a `Closer`
//! - Turn the first delivery into a single `trigger()`
//! - Turn a repeated delivery into an immediate process exit
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Subscriptions are installed before the closer is handed out, so a
//!   signal arriving right after construction is never missed
//! - The first subscription set is dropped before triggering; Tokio keeps
//!   its process-wide handler installed, so the "second signal kills"
//!   behaviour is restored explicitly with a fresh subscription
//! - Both phases end when the last handle to the closer is dropped

use std::fmt;
use std::io;

use futures_util::future::BoxFuture;

use crate::lifecycle::shutdown::Closer;

/// Signals a closer can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGQUIT.
    Quit,
    /// SIGHUP.
    Hangup,
    /// SIGUSR1.
    User1,
    /// SIGUSR2.
    User2,
}

impl ShutdownSignal {
    /// What orchestrators and terminals send to stop a service.
    pub const TERMINATION: &'static [ShutdownSignal] =
        &[ShutdownSignal::Interrupt, ShutdownSignal::Terminate];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
            ShutdownSignal::Hangup => "SIGHUP",
            ShutdownSignal::User1 => "SIGUSR1",
            ShutdownSignal::User2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    fn kind(self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            ShutdownSignal::Interrupt => SignalKind::interrupt(),
            ShutdownSignal::Terminate => SignalKind::terminate(),
            ShutdownSignal::Quit => SignalKind::quit(),
            ShutdownSignal::Hangup => SignalKind::hangup(),
            ShutdownSignal::User1 => SignalKind::user_defined1(),
            ShutdownSignal::User2 => SignalKind::user_defined2(),
        }
    }

    /// Exit status of a process terminated by this signal (128 + signo).
    #[cfg(unix)]
    pub fn exit_code(&self) -> i32 {
        128 + self.kind().as_raw_value()
    }

    #[cfg(not(unix))]
    pub fn exit_code(&self) -> i32 {
        130
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(unix)]
struct Subscriptions {
    streams: Vec<(ShutdownSignal, tokio::signal::unix::Signal)>,
}

#[cfg(unix)]
impl Subscriptions {
    fn install(signals: &[ShutdownSignal]) -> io::Result<Self> {
        let mut streams = Vec::with_capacity(signals.len());
        for &signal in signals {
            streams.push((signal, tokio::signal::unix::signal(signal.kind())?));
        }
        Ok(Self { streams })
    }

    /// Wait for the first delivery of any subscribed signal.
    async fn recv(&mut self) -> Option<ShutdownSignal> {
        let waits = self.streams.iter_mut().map(|(signal, stream)| {
            let signal = *signal;
            Box::pin(async move { stream.recv().await.map(|()| signal) })
        });
        let (received, _, _) = futures_util::future::select_all(waits).await;
        received
    }
}

#[cfg(not(unix))]
struct Subscriptions;

#[cfg(not(unix))]
impl Subscriptions {
    fn install(signals: &[ShutdownSignal]) -> io::Result<Self> {
        if signals.iter().any(|s| *s != ShutdownSignal::Interrupt) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "only Ctrl-C is supported on this platform",
            ));
        }
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<ShutdownSignal> {
        tokio::signal::ctrl_c()
            .await
            .ok()
            .map(|()| ShutdownSignal::Interrupt)
    }
}

/// Bind `closer` to `signals`.
///
/// Handlers are registered before this returns. An empty set is a no-op.
/// The listener holds no strong handle: once every clone of `closer` is
/// dropped it unsubscribes, including from the forced-exit phase.
pub(crate) fn bind(closer: &Closer, signals: &[ShutdownSignal]) -> io::Result<()> {
    if signals.is_empty() {
        return Ok(());
    }

    let mut subscriptions = Subscriptions::install(signals)?;
    let signals = signals.to_vec();
    let weak = closer.downgrade();
    let mut released = closer.released();

    closer.runtime().clone().spawn(async move {
        let received = tokio::select! {
            biased;
            _ = &mut released => return,
            received = subscriptions.recv() => received,
        };
        let Some(received) = received else {
            return;
        };
        drop(subscriptions);

        let Some(closer) = weak.upgrade() else {
            return;
        };
        tracing::warn!(
            signal = %received,
            closer = closer.name(),
            "Shutdown signal received"
        );
        closer.trigger();
        drop(closer);

        escalate(&signals, released).await;
    });

    Ok(())
}

/// Exit immediately on the next delivery of any of `signals`, for as long
/// as the closer is still held somewhere.
async fn escalate(signals: &[ShutdownSignal], released: BoxFuture<'static, ()>) {
    let mut subscriptions = match Subscriptions::install(signals) {
        Ok(subscriptions) => subscriptions,
        Err(e) => {
            tracing::warn!(error = %e, "Couldn't re-arm signal handlers for forced exit");
            return;
        }
    };

    tokio::select! {
        biased;
        _ = released => {
            tracing::debug!("Closer released, forced exit disarmed");
        }
        received = subscriptions.recv() => {
            if let Some(received) = received {
                tracing::error!(
                    signal = %received,
                    "Shutdown signal received again, exiting immediately"
                );
                std::process::exit(received.exit_code());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_set_is_int_and_term() {
        assert_eq!(
            ShutdownSignal::TERMINATION,
            &[ShutdownSignal::Interrupt, ShutdownSignal::Terminate]
        );
    }

    #[test]
    fn display_uses_conventional_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::User2.to_string(), "SIGUSR2");
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_follows_shell_convention() {
        assert_eq!(ShutdownSignal::Interrupt.exit_code(), 130);
        assert_eq!(ShutdownSignal::Terminate.exit_code(), 143);
    }

    #[tokio::test]
    async fn empty_signal_set_spawns_nothing() {
        let closer = Closer::builder("unbound").signals(&[]).build().unwrap();
        assert!(!closer.is_fired());
    }
}
