//! # Runtime events emitted by the supervisor, processes, and probes.
//!
//! [`EventKind`] classifies events across three categories:
//! - **State events**: one per process state transition (starting, running,
//!   backoff, stopping, exited, stopped, fatal, unhealthy)
//! - **Health events**: individual probe verdicts (passed, failed)
//! - **System events**: whole-daemon lifecycle (shutdown requested, all
//!   stopped within grace, grace exceeded, config reloaded)
//!
//! The [`Event`] struct carries metadata: process and group names, the
//! state the process left, the child PID, a free-form message, the
//! consecutive probe failure count, and the scheduled backoff delay.
//!
//! ## Ordering guarantees
//! Every event gets a globally unique sequence number (`seq`) that
//! increases monotonically. State events for one process are published
//! while its state lock is held, so their bus order equals the
//! state-transition order.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::process::ProcessState;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Process state events ===
    /// Process entered STARTING (spawn attempt beginning).
    ProcessStarting,
    /// Process entered RUNNING (child alive after spawn).
    ProcessRunning,
    /// Process entered BACKOFF (waiting to retry a failed start).
    ProcessBackoff,
    /// Process entered STOPPING (stop signal on its way to the group).
    ProcessStopping,
    /// Process entered EXITED (child left of its own accord, or a
    /// restart-style stop completed).
    ProcessExited,
    /// Process entered STOPPED (terminal, intent satisfied).
    ProcessStopped,
    /// Process entered FATAL (start retries exhausted).
    ProcessFatal,
    /// Process entered UNHEALTHY (consecutive probe failures hit the limit).
    ProcessUnhealthy,

    // === Health probe events ===
    /// A single probe reported healthy.
    HealthcheckPassed,
    /// A single probe reported unhealthy.
    HealthcheckFailed,

    // === System events ===
    /// Shutdown requested (OS signal received).
    ShutdownRequested,
    /// Every process reached a terminal state within the grace period.
    AllStoppedWithin,
    /// Grace period exceeded; stragglers were force-killed.
    GraceExceeded,
    /// A hot reload was applied.
    ConfigReloaded,
}

impl EventKind {
    /// Maps a process state to its transition event kind.
    pub fn for_state(state: ProcessState) -> Self {
        match state {
            ProcessState::Stopped => EventKind::ProcessStopped,
            ProcessState::Starting => EventKind::ProcessStarting,
            ProcessState::Running => EventKind::ProcessRunning,
            ProcessState::Backoff => EventKind::ProcessBackoff,
            ProcessState::Stopping => EventKind::ProcessStopping,
            ProcessState::Exited => EventKind::ProcessExited,
            ProcessState::Fatal => EventKind::ProcessFatal,
            ProcessState::Unhealthy => EventKind::ProcessUnhealthy,
        }
    }
}

/// Runtime event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Managed process name (instance name, e.g. `web:00`), if applicable.
    pub process: Option<String>,
    /// Group the process belongs to, if applicable.
    pub group: Option<String>,
    /// State the process transitioned out of, for state events.
    pub from_state: Option<ProcessState>,
    /// Child PID, where one exists.
    pub pid: Option<u32>,
    /// Free-form detail (exit status, probe error, spawn failure).
    pub message: Option<String>,
    /// Consecutive probe failure count, for health events.
    pub failures: Option<u32>,
    /// Scheduled backoff delay, for backoff events.
    pub delay: Option<Duration>,
}

impl Event {
    /// Creates a new event of the given kind with the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            process: None,
            group: None,
            from_state: None,
            pid: None,
            message: None,
            failures: None,
            delay: None,
        }
    }

    /// Attaches the process (instance) name.
    pub fn with_process(mut self, name: impl Into<String>) -> Self {
        self.process = Some(name.into());
        self
    }

    /// Attaches the group name.
    pub fn with_group(mut self, name: impl Into<String>) -> Self {
        self.group = Some(name.into());
        self
    }

    /// Attaches the state the process left.
    pub fn with_from_state(mut self, state: ProcessState) -> Self {
        self.from_state = Some(state);
        self
    }

    /// Attaches the child PID.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches a free-form message.
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attaches the consecutive probe failure count.
    pub fn with_failures(mut self, n: u32) -> Self {
        self.failures = Some(n);
        self
    }

    /// Attaches the scheduled backoff delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::now(EventKind::ProcessStarting);
        let b = Event::now(EventKind::ProcessRunning);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builder_attaches_metadata() {
        let ev = Event::now(EventKind::ProcessBackoff)
            .with_process("web:00")
            .with_group("web")
            .with_from_state(ProcessState::Starting)
            .with_delay(Duration::from_millis(500))
            .with_message("spawn failed");
        assert_eq!(ev.process.as_deref(), Some("web:00"));
        assert_eq!(ev.group.as_deref(), Some("web"));
        assert_eq!(ev.from_state, Some(ProcessState::Starting));
        assert_eq!(ev.delay, Some(Duration::from_millis(500)));
    }

    #[test]
    fn every_state_maps_to_a_distinct_kind() {
        let states = [
            ProcessState::Stopped,
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Backoff,
            ProcessState::Stopping,
            ProcessState::Exited,
            ProcessState::Fatal,
            ProcessState::Unhealthy,
        ];
        let mut kinds: Vec<EventKind> = states.iter().map(|s| EventKind::for_state(*s)).collect();
        kinds.dedup();
        assert_eq!(kinds.len(), states.len());
    }
}
