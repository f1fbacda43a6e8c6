//! # Process registry: the supervisor-owned set of supervision tasks.
//!
//! The registry owns one [`Handle`] per managed process: the entity, its
//! supervision task's `JoinHandle`, and the per-process cancellation
//! token. It is mutated only by the supervisor (startup, reload,
//! shutdown) behind a coarse `RwLock`; readers (`status`, group fan-out)
//! take cheap snapshots.
//!
//! ## Rules
//! - The registry owns handles; state lives inside each `Process`.
//! - Removal returns the handle so the caller can sequence
//!   stop → cancel → join without holding the registry lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::process::Process;

/// Handle to a running supervision task.
pub(crate) struct Handle {
    /// The managed entity.
    pub process: Arc<Process>,
    /// Join handle for the supervision loop.
    pub join: JoinHandle<()>,
    /// Individual cancellation token for this process.
    pub cancel: CancellationToken,
}

/// Registry of active processes, keyed by instance name.
pub(crate) struct Registry {
    procs: RwLock<HashMap<String, Handle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            procs: RwLock::new(HashMap::new()),
        }
    }

    /// Spawns the supervision task for a process and records the handle.
    pub async fn spawn(&self, process: Arc<Process>, parent: &CancellationToken) {
        let name = process.name().to_string();
        let cancel = parent.child_token();
        let join = tokio::spawn(Arc::clone(&process).run(cancel.clone()));

        let mut procs = self.procs.write().await;
        if let Some(old) = procs.insert(
            name.clone(),
            Handle {
                process,
                join,
                cancel,
            },
        ) {
            // Config validation rejects duplicates; this only fires if a
            // reload races itself, in which case the newest wins.
            warn!("replaced duplicate process handle '{name}'");
            old.cancel.cancel();
        }
    }

    /// Looks up one process by instance name.
    pub async fn get(&self, name: &str) -> Option<Arc<Process>> {
        self.procs.read().await.get(name).map(|h| Arc::clone(&h.process))
    }

    /// Snapshot of all processes, sorted by name for stable output.
    pub async fn snapshot(&self) -> Vec<Arc<Process>> {
        let procs = self.procs.read().await;
        let mut list: Vec<Arc<Process>> =
            procs.values().map(|h| Arc::clone(&h.process)).collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }

    /// Removes one handle; the caller sequences stop/cancel/join.
    pub async fn remove(&self, name: &str) -> Option<Handle> {
        self.procs.write().await.remove(name)
    }

    /// Drains every handle (shutdown).
    pub async fn drain(&self) -> Vec<Handle> {
        let mut procs = self.procs.write().await;
        procs.drain().map(|(_, h)| h).collect()
    }
}
