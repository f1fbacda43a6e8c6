//! # Process: the per-program supervision engine.
//!
//! One [`Process`] wraps at most one live OS child at a time and drives it
//! through the lifecycle states. The design splits **intent** from
//! **observed state**:
//!
//! - Control commands ([`Process::start`], [`Process::stop`],
//!   [`Process::restart`]) only write the `should_run` intent flag and wake
//!   the supervision loop, then wait for convergence. They never touch
//!   `state` directly, which keeps them trivially idempotent.
//! - The supervision loop ([`Process::run`]) is the sole writer of `state`:
//!   it spawns the child, watches for exits, applies the restart/backoff
//!   policy, reacts to probe verdicts, and executes stops.
//!
//! ## Supervision loop
//! ```text
//! loop {
//!   !should_run?  ──► park (STOPPED/EXITED/FATAL) until woken
//!   STARTING      ──► spawn
//!     spawn err   ──► retry_count += 1 ──► BACKOFF (sleep) or FATAL
//!     spawn ok    ──► RUNNING (pid, started_at recorded, probe task up)
//!   wait on: child exit │ wake (stop) │ probe verdict │ startsecs timer │ cancel
//!     exit, uptime ≥ startsecs ──► EXITED ──► BACKOFF(0)/STOPPED per autorestart
//!     exit, uptime < startsecs ──► failed start path (BACKOFF/FATAL)
//!     stop request             ──► STOPPING ──► kill group ──► STOPPED
//!     unhealthy + autorestart  ──► STOPPING ──► kill ──► EXITED ──► BACKOFF(0)
//!     cancel (daemon shutdown) ──► STOPPING ──► kill ──► STOPPED, loop exits
//! }
//! ```
//!
//! All mutations of the record go through one `std::sync::Mutex`, never
//! held across an await; state events are published while the lock is
//! held, so the event order equals the transition order. A `watch`
//! channel mirrors `state` for the command side; a `Notify` wakes the
//! loop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{HealthCheckKind, ProgramConfig};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::health::prober_for;
use crate::policies::BackoffPolicy;

use super::spawn::{self, SpawnedChild};
use super::state::{Health, ProcessState};

/// How long a start command waits for RUNNING before reporting failure.
const START_WAIT: Duration = Duration::from_secs(5);

/// How a pending stop should take the child down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopMode {
    /// `stopsignal`, then SIGKILL after `stopwaitsecs`.
    Graceful,
    /// SIGKILL immediately.
    Force,
}

/// Edge signals from the probe loop to the supervision loop.
enum ProbeSignal {
    /// Consecutive failures reached the limit.
    Unhealthy { failures: u32, message: String },
    /// A probe passed after the unhealthy edge.
    Recovered,
}

/// Why the child-wait select returned.
enum ChildOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Stop(StopMode),
    HealthRestart,
    Shutdown,
}

/// Whether the supervision loop keeps going.
#[derive(PartialEq)]
enum LoopStep {
    Continue,
    Exit,
}

/// Mutable per-process record, guarded by one lock.
struct ProcRecord {
    state: ProcessState,
    should_run: bool,
    stop_mode: StopMode,
    pid: Option<u32>,
    started_at: Option<Instant>,
    retry_count: u32,
    health: Health,
}

/// Point-in-time view for the control plane.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    pub name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub uptime: Option<Duration>,
    /// `Some(true)` = ok, `Some(false)` = fail, `None` = no verdict.
    pub healthy: Option<bool>,
}

/// A supervised program instance.
pub struct Process {
    config: ProgramConfig,
    bus: Bus,
    backoff: BackoffPolicy,
    record: Mutex<ProcRecord>,
    wake: Notify,
    state_tx: watch::Sender<ProcessState>,
}

impl Process {
    /// Creates the entity; `should_run` is seeded from `autostart`.
    pub fn new(config: ProgramConfig, bus: Bus) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ProcessState::Stopped);
        Arc::new(Self {
            record: Mutex::new(ProcRecord {
                state: ProcessState::Stopped,
                should_run: config.autostart,
                stop_mode: StopMode::Graceful,
                pid: None,
                started_at: None,
                retry_count: 0,
                health: Health::Unknown,
            }),
            config,
            bus,
            backoff: BackoffPolicy::default(),
            wake: Notify::new(),
            state_tx,
        })
    }

    /// Instance name (`web` or `web:01`).
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The immutable program configuration.
    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ProcessState {
        self.lock().state
    }

    /// Snapshot for `status` responses.
    pub fn status(&self) -> ProcessStatus {
        let rec = self.lock();
        ProcessStatus {
            name: self.config.name.clone(),
            state: rec.state,
            pid: rec.pid,
            uptime: rec.started_at.map(|t| t.elapsed()),
            healthy: match rec.health {
                Health::Unknown => None,
                Health::Healthy => Some(true),
                Health::Unhealthy => Some(false),
            },
        }
    }

    // -----------------------------------------------------------------
    // Command intake (called from RPC handlers and the supervisor)
    // -----------------------------------------------------------------

    /// Requests the process to run and waits up to 5s for RUNNING.
    ///
    /// From FATAL this resets the retry budget, making the command a real
    /// edge. Idempotent: an already-running process returns immediately.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let mut rx = self.state_tx.subscribe();
        {
            let mut rec = self.lock();
            if rec.state == ProcessState::Fatal {
                rec.retry_count = 0;
            }
            rec.should_run = true;
            rec.stop_mode = StopMode::Graceful;
        }
        self.wake.notify_one();

        let waited = time::timeout(START_WAIT, async {
            // Skip the pre-command terminal state; judge only what the
            // supervision loop does after the wake-up.
            if *rx.borrow_and_update() == ProcessState::Running {
                return Ok(());
            }
            loop {
                if rx.changed().await.is_err() {
                    return Err(ProcessState::Stopped);
                }
                match *rx.borrow_and_update() {
                    ProcessState::Running => return Ok(()),
                    ProcessState::Fatal => return Err(ProcessState::Fatal),
                    _ => continue,
                }
            }
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(state)) => Err(RuntimeError::StartFailed {
                name: self.config.name.clone(),
                state: state.to_string(),
            }),
            Err(_elapsed) => Err(RuntimeError::StartTimeout {
                name: self.config.name.clone(),
                waited: START_WAIT,
            }),
        }
    }

    /// Requests the process to stop and waits for a terminal state.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.request_stop(StopMode::Graceful).await
    }

    /// Stop (graceful or SIGKILL) followed by start.
    pub async fn restart(&self, force: bool) -> Result<(), RuntimeError> {
        let mode = if force { StopMode::Force } else { StopMode::Graceful };
        self.request_stop(mode).await?;
        self.start().await
    }

    async fn request_stop(&self, mode: StopMode) -> Result<(), RuntimeError> {
        let mut rx = self.state_tx.subscribe();
        {
            let mut rec = self.lock();
            rec.should_run = false;
            rec.stop_mode = mode;
        }
        self.wake.notify_one();

        // SIGKILL escalation bounds this wait; no extra deadline needed.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        Ok(())
    }

    /// Last-resort SIGKILL to the stored process group, used by the
    /// supervisor when the shutdown deadline has passed. The supervision
    /// loop still reaps the child.
    pub fn force_kill_now(&self) {
        let pid = {
            let mut rec = self.lock();
            rec.should_run = false;
            rec.stop_mode = StopMode::Force;
            rec.pid
        };
        self.wake.notify_one();
        if let Some(pid) = pid {
            let _ = spawn::signal_group(pid, Signal::SIGKILL);
        }
    }

    // -----------------------------------------------------------------
    // Supervision loop (sole authority over `state`)
    // -----------------------------------------------------------------

    /// Runs the supervision loop until the token is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut prev_delay: Option<Duration> = None;

        loop {
            if token.is_cancelled() {
                break;
            }
            let should_run = self.lock().should_run;
            if !should_run {
                // A stop can land while we are in BACKOFF; make the
                // observed state match the satisfied intent.
                if !self.state().is_terminal() {
                    self.apply(ProcessState::Stopped, false, |e| e);
                }
                tokio::select! {
                    _ = self.wake.notified() => continue,
                    _ = token.cancelled() => break,
                }
            }

            self.apply(ProcessState::Starting, false, |e| e);
            let step = match spawn::launch(&self.config) {
                Err(err) => {
                    self.start_failure(err.is_non_recoverable(), err.to_string(), &mut prev_delay, &token)
                        .await
                }
                Ok(spawned) => self.supervise_child(spawned, &mut prev_delay, &token).await,
            };
            if step == LoopStep::Exit {
                break;
            }
        }
        debug!(process = self.name(), "supervision loop ended");
    }

    /// Drives one child lifetime: RUNNING through exit/stop/restart.
    async fn supervise_child(
        self: &Arc<Self>,
        spawned: SpawnedChild,
        prev_delay: &mut Option<Duration>,
        token: &CancellationToken,
    ) -> LoopStep {
        let SpawnedChild { mut child, pid } = spawned;

        // A child that died between fork and our first look never counts
        // as RUNNING; it goes straight down the failed-start path.
        if let Ok(Some(status)) = child.try_wait() {
            return self
                .start_failure(
                    status.code() == Some(126),
                    format!("exited at spawn ({})", describe_exit(&status)),
                    prev_delay,
                    token,
                )
                .await;
        }

        {
            let mut rec = self.lock();
            rec.pid = Some(pid);
            rec.started_at = Some(Instant::now());
            rec.health = Health::Unknown;
        }
        self.apply(ProcessState::Running, false, |e| e);

        let probe_token = token.child_token();
        let (verdict_tx, mut verdict_rx) = mpsc::channel::<ProbeSignal>(16);
        if self.config.healthcheck.kind != HealthCheckKind::None {
            tokio::spawn(Arc::clone(self).probe_loop(probe_token.clone(), verdict_tx));
        } else {
            drop(verdict_tx);
        }

        let started = Instant::now();
        let mut sustained = self.config.startsecs.is_zero();
        if sustained {
            let mut rec = self.lock();
            rec.retry_count = 0;
            *prev_delay = None;
        }
        let sustain = time::sleep(self.config.startsecs);
        tokio::pin!(sustain);

        let outcome = loop {
            tokio::select! {
                status = child.wait() => break ChildOutcome::Exited(status),
                _ = &mut sustain, if !sustained => {
                    sustained = true;
                    self.lock().retry_count = 0;
                    *prev_delay = None;
                }
                _ = self.wake.notified() => {
                    let (should_run, mode) = {
                        let rec = self.lock();
                        (rec.should_run, rec.stop_mode)
                    };
                    if !should_run {
                        break ChildOutcome::Stop(mode);
                    }
                }
                Some(signal) = verdict_rx.recv() => {
                    match signal {
                        ProbeSignal::Unhealthy { failures, message } => {
                            self.lock().health = Health::Unhealthy;
                            self.apply(ProcessState::Unhealthy, false, |e| {
                                e.with_failures(failures).with_message(message.clone())
                            });
                            if self.config.autorestart {
                                break ChildOutcome::HealthRestart;
                            }
                        }
                        ProbeSignal::Recovered => {
                            self.lock().health = Health::Healthy;
                            if self.state() == ProcessState::Unhealthy {
                                self.apply(ProcessState::Running, false, |e| e);
                            }
                        }
                    }
                }
                _ = token.cancelled() => break ChildOutcome::Shutdown,
            }
        };
        probe_token.cancel();

        match outcome {
            ChildOutcome::Exited(result) => {
                let uptime = started.elapsed();
                let detail = match &result {
                    Ok(status) => describe_exit(status),
                    Err(err) => format!("wait failed: {err}"),
                };
                self.clear_child();

                if !self.lock().should_run {
                    // Exit raced a stop command; intent is already satisfied.
                    self.apply(ProcessState::Stopped, false, |e| e.with_message(detail));
                    return LoopStep::Continue;
                }

                if uptime >= self.config.startsecs {
                    self.apply(ProcessState::Exited, false, |e| e.with_message(detail));
                    if self.config.autorestart {
                        *prev_delay = None;
                        self.apply(ProcessState::Backoff, false, |e| e.with_delay(Duration::ZERO));
                        LoopStep::Continue
                    } else {
                        self.apply(ProcessState::Stopped, true, |e| e);
                        LoopStep::Continue
                    }
                } else {
                    let code = result.as_ref().ok().and_then(|s| s.code());
                    self.start_failure(
                        code == Some(126),
                        format!("exited before startsecs ({detail})"),
                        prev_delay,
                        token,
                    )
                    .await
                }
            }
            ChildOutcome::Stop(mode) => {
                self.apply(ProcessState::Stopping, false, |e| e);
                self.kill_child(&mut child, pid, mode).await;
                self.clear_child();
                self.apply(ProcessState::Stopped, false, |e| e);
                LoopStep::Continue
            }
            ChildOutcome::HealthRestart => {
                self.apply(ProcessState::Stopping, false, |e| {
                    e.with_message("health check failed, restarting")
                });
                self.kill_child(&mut child, pid, StopMode::Graceful).await;
                self.clear_child();
                // A health restart never consumes the retry budget: the
                // child had been accepted as running.
                self.apply(ProcessState::Exited, false, |e| e.with_message("health restart"));
                *prev_delay = None;
                self.apply(ProcessState::Backoff, false, |e| e.with_delay(Duration::ZERO));
                LoopStep::Continue
            }
            ChildOutcome::Shutdown => {
                self.apply(ProcessState::Stopping, false, |e| e);
                let mode = self.lock().stop_mode;
                self.kill_child(&mut child, pid, mode).await;
                self.clear_child();
                self.apply(ProcessState::Stopped, true, |e| e);
                LoopStep::Exit
            }
        }
    }

    /// Applies the failed-start policy: consume one retry, then BACKOFF
    /// (with a capped delay) or FATAL when the budget is gone.
    async fn start_failure(
        &self,
        non_recoverable: bool,
        message: String,
        prev_delay: &mut Option<Duration>,
        token: &CancellationToken,
    ) -> LoopStep {
        self.clear_child();
        let retries = {
            let mut rec = self.lock();
            rec.retry_count += 1;
            rec.retry_count
        };
        if non_recoverable {
            warn!(process = self.name(), "non-recoverable start failure: {message}");
        }

        let exhausted = retries >= self.config.startretries.max(1);
        if exhausted && non_recoverable {
            self.apply(ProcessState::Fatal, true, |e| {
                e.with_message(format!("start retries exhausted: {message}"))
            });
            return LoopStep::Continue;
        }

        let delay = self.backoff.next(*prev_delay);
        *prev_delay = Some(delay);
        self.apply(ProcessState::Backoff, false, |e| {
            e.with_delay(delay).with_message(message.clone())
        });
        if exhausted {
            self.apply(ProcessState::Fatal, true, |e| {
                e.with_message(format!("start retries exhausted: {message}"))
            });
            return LoopStep::Continue;
        }

        tokio::select! {
            _ = time::sleep(delay) => LoopStep::Continue,
            // A wake here is a command edge; the loop top re-reads intent.
            _ = self.wake.notified() => LoopStep::Continue,
            _ = token.cancelled() => LoopStep::Exit,
        }
    }

    /// Kill primitive: signal the process group, escalate, reap.
    async fn kill_child(&self, child: &mut tokio::process::Child, pid: u32, mode: StopMode) {
        match mode {
            StopMode::Graceful => {
                let sig = self.config.stop_signal();
                if let Err(err) = spawn::signal_group(pid, sig) {
                    warn!(process = self.name(), "failed to signal group {pid}: {err}");
                }
                match time::timeout(self.config.stopwaitsecs, child.wait()).await {
                    Ok(_) => {}
                    Err(_elapsed) => {
                        warn!(
                            process = self.name(),
                            "no exit within {:?}, escalating to SIGKILL", self.config.stopwaitsecs
                        );
                        let _ = spawn::signal_group(pid, Signal::SIGKILL);
                        let _ = child.wait().await;
                    }
                }
            }
            StopMode::Force => {
                let _ = spawn::signal_group(pid, Signal::SIGKILL);
                let _ = child.wait().await;
            }
        }
    }

    // -----------------------------------------------------------------
    // Probe loop (owned by the child lifetime)
    // -----------------------------------------------------------------

    /// Periodic health probing while the child lives. Publishes individual
    /// verdicts; forwards only edges to the supervision loop.
    async fn probe_loop(self: Arc<Self>, token: CancellationToken, tx: mpsc::Sender<ProbeSignal>) {
        let Some(prober) = prober_for(&self.config.healthcheck) else {
            return;
        };
        let hc = &self.config.healthcheck;

        tokio::select! {
            _ = time::sleep(hc.start_period) => {}
            _ = token.cancelled() => return,
        }

        let mut failures: u32 = 0;
        let mut reported_unhealthy = false;
        loop {
            let report = tokio::select! {
                r = prober.probe() => r,
                _ = token.cancelled() => return,
            };

            if report.healthy {
                failures = 0;
                self.lock().health = Health::Healthy;
                self.bus.publish(
                    Event::now(EventKind::HealthcheckPassed)
                        .with_process(self.name())
                        .with_group(self.config.effective_group()),
                );
                if reported_unhealthy {
                    reported_unhealthy = false;
                    if tx.send(ProbeSignal::Recovered).await.is_err() {
                        return;
                    }
                }
            } else {
                failures += 1;
                self.bus.publish(
                    Event::now(EventKind::HealthcheckFailed)
                        .with_process(self.name())
                        .with_group(self.config.effective_group())
                        .with_failures(failures)
                        .with_message(report.message.clone()),
                );
                if failures >= hc.retries && !reported_unhealthy {
                    reported_unhealthy = true;
                    if tx
                        .send(ProbeSignal::Unhealthy {
                            failures,
                            message: report.message,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }

            tokio::select! {
                _ = time::sleep(hc.interval) => {}
                _ = token.cancelled() => return,
            }
        }
    }

    // -----------------------------------------------------------------
    // Record helpers
    // -----------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, ProcRecord> {
        // The lock is only ever held for plain field updates; poisoning
        // would mean a panic inside one of those, which cannot recover.
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clear_child(&self) {
        let mut rec = self.lock();
        rec.pid = None;
        rec.started_at = None;
        rec.health = Health::Unknown;
    }

    /// The single state-transition point: mutates the record, publishes
    /// the event while the lock is held, and mirrors the state into the
    /// watch channel.
    fn apply(
        &self,
        next: ProcessState,
        clear_intent: bool,
        decorate: impl FnOnce(Event) -> Event,
    ) {
        let rec = &mut *self.lock();
        let from = rec.state;
        if clear_intent {
            rec.should_run = false;
        }
        if from == next {
            return;
        }
        rec.state = next;

        let mut ev = Event::now(EventKind::for_state(next))
            .with_process(&self.config.name)
            .with_group(self.config.effective_group())
            .with_from_state(from);
        if let Some(pid) = rec.pid {
            ev = ev.with_pid(pid);
        }
        self.bus.publish(decorate(ev));
        let _ = self.state_tx.send(next);
    }
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit status {code}"),
        (None, Some(sig)) => format!("terminated by signal {sig}"),
        (None, None) => "unknown exit status".to_string(),
    }
}
