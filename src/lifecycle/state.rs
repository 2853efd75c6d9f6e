//! Server lifecycle state machine.
//!
//! # States
//! ```text
//! Initialized ──listener bound──▶ Listening ──signal / stop / serve error──▶ Draining
//!      │                                                                       │
//!      └──────────── no public listener ───────────▶ Stopped ◀── teardown done ─┘
//! ```
//!
//! Transitions only move forward, so `Stopped` is entered exactly once.

use std::fmt;

use tokio::sync::watch;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Initialized,
    Listening,
    Draining,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Initialized => "initialized",
            LifecycleState::Listening => "listening",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }

    /// Whether new traffic should be routed here.
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Listening)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, forward-only holder of the current state.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<LifecycleState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Initialized);
        metrics::set_lifecycle_state(LifecycleState::Initialized);
        Self { tx }
    }

    pub(crate) fn get(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Move to `next` if it lies ahead of the current state.
    pub(crate) fn advance(&self, next: LifecycleState) -> bool {
        let mut from = next;
        let moved = self.tx.send_if_modified(|current| {
            if next > *current {
                from = *current;
                *current = next;
                true
            } else {
                false
            }
        });

        if moved {
            tracing::info!(from = %from, to = %next, "Lifecycle state changed");
            metrics::set_lifecycle_state(next);
        }
        moved
    }
}
