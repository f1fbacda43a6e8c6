//! # Process lifecycle states.
//!
//! ```text
//!                ┌──────────────────────────────────────────────┐
//!                ▼                                              │
//! STOPPED ─► STARTING ─► RUNNING ─► EXITED ─► BACKOFF ──────────┤
//!                │          │  ▲        │         │             │
//!                │          ▼  │        ▼         ▼             │
//!                │      UNHEALTHY   STOPPED     FATAL ─► (start)┘
//!                │          │
//!                ▼          ▼
//!             BACKOFF   STOPPING ─► EXITED / STOPPED
//! ```
//!
//! Terminal states (`STOPPED`, `EXITED`, `FATAL`) have no live child; the
//! supervision loop parks there until intent changes.

use std::fmt;

/// State of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not running; initial state and the result of a satisfied stop.
    Stopped,
    /// Spawn attempt in progress.
    Starting,
    /// Child alive.
    Running,
    /// Waiting to retry after a failed start.
    Backoff,
    /// Stop signal sent; waiting for the child to be reaped.
    Stopping,
    /// Child exited of its own accord (or a restart-style stop finished).
    Exited,
    /// Start retries exhausted; only an explicit start leaves this state.
    Fatal,
    /// Child alive but failing its health probe.
    Unhealthy,
}

impl ProcessState {
    /// Wire/display name, upper-case.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Stopped => "STOPPED",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Backoff => "BACKOFF",
            ProcessState::Stopping => "STOPPING",
            ProcessState::Exited => "EXITED",
            ProcessState::Fatal => "FATAL",
            ProcessState::Unhealthy => "UNHEALTHY",
        }
    }

    /// True for states the supervision loop parks in with no child alive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal
        )
    }

    /// True while a child process exists.
    pub fn has_child(&self) -> bool {
        matches!(
            self,
            ProcessState::Running | ProcessState::Unhealthy | ProcessState::Stopping
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probe-derived health of a running child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Health {
    /// No verdict yet (no probes configured, or none completed).
    #[default]
    Unknown,
    /// Last probe passed.
    Healthy,
    /// Consecutive failures reached the configured limit.
    Unhealthy,
}
