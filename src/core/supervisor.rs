//! # Supervisor: the top-level orchestrator.
//!
//! The [`Supervisor`] owns the process registry, the group index, the
//! event bus, and the control plane. It is the only component that
//! mutates the *set* of processes (startup, reload, shutdown) — all
//! per-process decisions stay inside each [`Process`].
//!
//! ## Wiring
//! ```text
//! DaemonConfig ──► Supervisor::run()
//!                     ├─ acquire PID-file lock (singleton)
//!                     ├─ spawn event delivery task ──► SubscriberSet
//!                     ├─ spawn SIGHUP listener (log + ignore)
//!                     ├─ expand programs ──► Process per instance
//!                     │        └─ Registry spawns supervision tasks
//!                     ├─ bind + serve RPC socket
//!                     └─ wait: SIGTERM/SIGINT or shutdown()
//!                           └─ graceful shutdown:
//!                                release pidfile → stop RPC →
//!                                stop all processes (deadline) →
//!                                force-kill stragglers → join tasks →
//!                                drain subscribers
//! ```
//!
//! ## Hot reload
//! `reload()` re-parses the config file and reconciles by program name:
//! added programs are constructed and started per `autostart`, removed
//! ones are stopped and dropped, changed ones are only *reported* — the
//! daemon never silently recycles a running child. The group index is
//! rebuilt from the effective program set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{self, DaemonConfig, ProgramConfig};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::process::{Process, ProcessStatus};
use crate::rpc::RpcServer;
use crate::subscribers::{Subscribe, SubscriberSet};

use super::pidfile::PidFileLock;
use super::registry::Registry;
use super::shutdown;

/// Extra time granted to stragglers after the deadline SIGKILL.
const FORCE_REAP_WAIT: Duration = Duration::from_secs(5);

/// Outcome of a hot reload, sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadReport {
    /// Programs newly constructed and registered.
    pub added: Vec<String>,
    /// Programs stopped and dropped.
    pub removed: Vec<String>,
    /// Programs whose config differs; reported, not applied.
    pub changed: Vec<String>,
}

/// Top-level orchestrator owning the process set and control plane.
pub struct Supervisor {
    config: RwLock<DaemonConfig>,
    config_path: PathBuf,
    bus: Bus,
    registry: Registry,
    groups: RwLock<HashMap<String, Vec<String>>>,
    /// Cancels every runtime task (supervision loops, listeners).
    runtime_token: CancellationToken,
    /// Trips the main wait-point into the shutdown sequence.
    shutdown_requested: CancellationToken,
    subscribers: std::sync::Mutex<Vec<Arc<dyn Subscribe>>>,
}

impl Supervisor {
    /// Creates a supervisor for a validated config.
    ///
    /// `config_path` is re-read on every `reload`.
    pub fn new(
        config: DaemonConfig,
        config_path: impl Into<PathBuf>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            config_path: config_path.into(),
            bus: Bus::default(),
            registry: Registry::new(),
            groups: RwLock::new(HashMap::new()),
            runtime_token: CancellationToken::new(),
            shutdown_requested: CancellationToken::new(),
            subscribers: std::sync::Mutex::new(subscribers),
        })
    }

    /// The shared event bus (subscribe for observation).
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Requests a graceful shutdown, as if a termination signal arrived.
    pub fn shutdown(&self) {
        self.shutdown_requested.cancel();
    }

    /// Runs the daemon until a termination signal or [`Supervisor::shutdown`].
    pub async fn run(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let (pidfile_path, socket_path, grace) = {
            let cfg = self.config.read().await;
            (
                cfg.pidfile.clone(),
                cfg.socket_path.clone(),
                cfg.shutdown_timeout,
            )
        };

        let pidfile = PidFileLock::acquire(&pidfile_path)?;
        info!("pidfile lock held at {}", pidfile_path.display());

        let delivery_token = CancellationToken::new();
        let delivery = self.spawn_delivery(delivery_token.clone());
        shutdown::spawn_sighup_listener(self.runtime_token.child_token());

        // Bind before any child is spawned: a bind failure must abort the
        // startup with nothing to reap.
        let server = match RpcServer::bind(&socket_path) {
            Ok(server) => server,
            Err(err) => {
                pidfile.release();
                delivery_token.cancel();
                let _ = delivery.await;
                return Err(RuntimeError::Io(err));
            }
        };
        info!("control socket listening on {}", socket_path.display());

        // Construct the initial process set before the control plane can
        // observe it.
        {
            let cfg = self.config.read().await;
            for program in &cfg.programs {
                self.register_program(program).await;
            }
            *self.groups.write().await = build_groups(&cfg.programs);
        }

        let rpc_token = self.runtime_token.child_token();
        let rpc = {
            let sup = Arc::clone(self);
            let token = rpc_token.clone();
            tokio::spawn(async move { server.serve(sup, token).await })
        };

        tokio::select! {
            sig = shutdown::wait_for_shutdown_signal() => {
                if let Err(err) = sig {
                    error!("signal handling failed: {err}");
                }
                info!("termination signal received");
            }
            _ = self.shutdown_requested.cancelled() => {
                info!("shutdown requested");
            }
        }

        self.graceful_shutdown(pidfile, rpc_token, rpc, delivery_token, delivery, grace)
            .await
    }

    // -----------------------------------------------------------------
    // Control-plane operations (called by the RPC server)
    // -----------------------------------------------------------------

    /// Per-process status snapshots, sorted by name.
    pub async fn status(&self) -> Vec<ProcessStatus> {
        self.registry
            .snapshot()
            .await
            .iter()
            .map(|p| p.status())
            .collect()
    }

    /// Starts one process by instance name.
    pub async fn start_process(&self, name: &str) -> Result<(), RuntimeError> {
        let proc = self.lookup(name).await?;
        proc.start().await
    }

    /// Stops one process by instance name.
    pub async fn stop_process(&self, name: &str) -> Result<(), RuntimeError> {
        let proc = self.lookup(name).await?;
        proc.stop().await
    }

    /// Restarts one process; `force` uses SIGKILL semantics for the stop.
    pub async fn restart_process(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let proc = self.lookup(name).await?;
        proc.restart(force).await
    }

    /// Starts every member of a group concurrently; all must succeed.
    pub async fn start_group(&self, group: &str) -> Result<(), RuntimeError> {
        self.group_fanout(group, true).await
    }

    /// Stops every member of a group concurrently; all must succeed.
    pub async fn stop_group(&self, group: &str) -> Result<(), RuntimeError> {
        self.group_fanout(group, false).await
    }

    /// Re-reads the config file and reconciles the process set.
    ///
    /// Any parse/validation failure aborts with no state change.
    pub async fn reload(&self) -> Result<ReloadReport, RuntimeError> {
        let new_cfg = config::load(&self.config_path)?;
        let mut cfg = self.config.write().await;

        let old_by_name: HashMap<String, ProgramConfig> = cfg
            .programs
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();
        let new_by_name: HashMap<String, ProgramConfig> = new_cfg
            .programs
            .iter()
            .map(|p| (p.name.clone(), p.clone()))
            .collect();

        let mut report = ReloadReport::default();
        for name in old_by_name.keys() {
            if !new_by_name.contains_key(name) {
                report.removed.push(name.clone());
            }
        }
        for prog in &new_cfg.programs {
            match old_by_name.get(&prog.name) {
                None => report.added.push(prog.name.clone()),
                Some(old) if old != prog => report.changed.push(prog.name.clone()),
                Some(_) => {}
            }
        }

        for name in &report.removed {
            if let Some(old) = old_by_name.get(name) {
                self.unregister_program(old).await;
            }
        }
        for name in &report.added {
            if let Some(prog) = new_by_name.get(name) {
                self.register_program(prog).await;
            }
        }

        // Effective set: retained programs keep their running config
        // (changed ones included — the operator restarts to apply),
        // added ones come from the new file.
        let mut programs: Vec<ProgramConfig> = cfg
            .programs
            .iter()
            .filter(|p| !report.removed.contains(&p.name))
            .cloned()
            .collect();
        for name in &report.added {
            if let Some(prog) = new_by_name.get(name) {
                programs.push(prog.clone());
            }
        }
        cfg.programs = programs;
        *self.groups.write().await = build_groups(&cfg.programs);
        drop(cfg);

        report.added.sort();
        report.removed.sort();
        report.changed.sort();

        self.bus.publish(Event::now(EventKind::ConfigReloaded).with_message(format!(
            "added={} removed={} changed={}",
            report.added.len(),
            report.removed.len(),
            report.changed.len()
        )));
        info!(
            added = ?report.added,
            removed = ?report.removed,
            changed = ?report.changed,
            "config reloaded"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    async fn lookup(&self, name: &str) -> Result<Arc<Process>, RuntimeError> {
        self.registry
            .get(name)
            .await
            .ok_or_else(|| RuntimeError::ProcessNotFound {
                name: name.to_string(),
            })
    }

    async fn group_fanout(&self, group: &str, start: bool) -> Result<(), RuntimeError> {
        let members = {
            let groups = self.groups.read().await;
            groups
                .get(group)
                .cloned()
                .ok_or_else(|| RuntimeError::GroupNotFound {
                    name: group.to_string(),
                })?
        };

        let mut procs = Vec::new();
        for member in &members {
            if let Some(proc) = self.registry.get(member).await {
                procs.push(proc);
            }
        }

        let results = futures::future::join_all(procs.iter().map(|p| async {
            if start {
                p.start().await
            } else {
                p.stop().await
            }
        }))
        .await;

        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    /// Expands a program into instances and spawns their supervision tasks.
    async fn register_program(&self, program: &ProgramConfig) {
        for instance in program.instances() {
            let proc = Process::new(instance, self.bus.clone());
            self.registry.spawn(proc, &self.runtime_token).await;
        }
    }

    /// Stops a program's instances, awaits terminal states, drops handles.
    async fn unregister_program(&self, program: &ProgramConfig) {
        for instance in program.instances() {
            if let Some(handle) = self.registry.remove(&instance.name).await {
                if let Err(err) = handle.process.stop().await {
                    warn!(process = instance.name.as_str(), "stop during reload failed: {err}");
                }
                handle.cancel.cancel();
                if handle.join.await.is_err() {
                    warn!(process = instance.name.as_str(), "supervision task panicked");
                }
            }
        }
    }

    /// Single delivery task: drains the bus through a tap (which owns
    /// the overflow accounting) and fans out to subscribers; on
    /// shutdown it flushes the buffered backlog before the workers are
    /// drained.
    fn spawn_delivery(&self, token: CancellationToken) -> JoinHandle<()> {
        let mut tap = self.bus.tap();
        let subs = SubscriberSet::new(std::mem::take(
            &mut *self
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        ));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    ev = tap.next() => match ev {
                        Some(ev) => subs.emit(Arc::new(ev)),
                        None => break,
                    }
                }
            }
            while let Some(ev) = tap.try_next() {
                subs.emit(Arc::new(ev));
            }
            subs.shutdown().await;
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn graceful_shutdown(
        &self,
        pidfile: PidFileLock,
        rpc_token: CancellationToken,
        rpc: JoinHandle<()>,
        delivery_token: CancellationToken,
        delivery: JoinHandle<()>,
        grace: Duration,
    ) -> Result<(), RuntimeError> {
        self.bus.publish(Event::now(EventKind::ShutdownRequested));

        // Singleton lock first: a replacement daemon may start binding
        // while we are still reaping children.
        pidfile.release();

        rpc_token.cancel();
        if rpc.await.is_err() {
            warn!("rpc server task panicked");
        }

        let procs = self.registry.snapshot().await;
        let stops = futures::future::join_all(procs.iter().map(|p| p.stop()));
        let mut stuck: Vec<String> = Vec::new();

        if time::timeout(grace, stops).await.is_err() {
            for proc in &procs {
                if !proc.state().is_terminal() {
                    stuck.push(proc.name().to_string());
                    proc.force_kill_now();
                }
            }
            stuck.sort();
            warn!(?stuck, "grace period exceeded, sent SIGKILL");
            let reaps = futures::future::join_all(procs.iter().map(|p| p.stop()));
            let _ = time::timeout(FORCE_REAP_WAIT, reaps).await;
        }

        self.runtime_token.cancel();
        for handle in self.registry.drain().await {
            handle.cancel.cancel();
            if handle.join.await.is_err() {
                warn!(process = handle.process.name(), "supervision task panicked");
            }
        }

        if stuck.is_empty() {
            self.bus.publish(Event::now(EventKind::AllStoppedWithin));
        } else {
            self.bus.publish(
                Event::now(EventKind::GraceExceeded)
                    .with_message(format!("force-killed: {}", stuck.join(", "))),
            );
        }

        delivery_token.cancel();
        let _ = delivery.await;

        if stuck.is_empty() {
            info!("shutdown complete");
            Ok(())
        } else {
            Err(RuntimeError::GraceExceeded { grace, stuck })
        }
    }
}

/// Builds the group index: explicit groups plus implicit singletons.
fn build_groups(programs: &[ProgramConfig]) -> HashMap<String, Vec<String>> {
    let mut groups: HashMap<String, Vec<String>> = HashMap::new();
    for program in programs {
        for instance in program.instances() {
            groups
                .entry(instance.effective_group().to_string())
                .or_default()
                .push(instance.name.clone());
        }
    }
    groups
}
