//! # procvisor
//!
//! **Procvisor** is a Unix process supervisor: a long-running daemon that
//! spawns, monitors, restarts, and gracefully stops a configured set of
//! child processes, exposes a control plane over a local socket, and
//! supports runtime reconfiguration.
//!
//! ## Features
//!
//! | Area             | Description                                                        | Key types                                  |
//! |------------------|--------------------------------------------------------------------|--------------------------------------------|
//! | **Supervision**  | Per-process state machine with restart/backoff/FATAL policy.       | [`Process`], [`ProcessState`]              |
//! | **Health**       | Periodic TCP/script probes that can force restarts.                | [`Prober`], [`TcpProber`], [`ScriptProber`]|
//! | **Orchestration**| Process set, groups, signals, graceful shutdown, hot reload.       | [`Supervisor`], [`ReloadReport`]           |
//! | **Control plane**| Framed JSON over an owner-only Unix socket.                        | [`RpcServer`], [`Controller`]              |
//! | **Events**       | Bounded pub/sub of lifecycle events for observers.                 | [`Event`], [`EventKind`], [`Bus`]          |
//! | **Observers**    | Pluggable, panic-isolated event handlers.                          | [`Subscribe`], [`SubscriberSet`]           |
//! | **Configuration**| INI file → validated records, instance expansion.                  | [`DaemonConfig`], [`ProgramConfig`]        |
//! | **Errors**       | Typed errors for the runtime and the config boundary.              | [`RuntimeError`], [`ConfigError`]          |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use procvisor::{config, LogSubscriber, Subscribe, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let path = std::path::Path::new("procvisor.conf");
//!     let cfg = config::load(path)?;
//!     let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogSubscriber)];
//!
//!     let supervisor = Supervisor::new(cfg, path, subscribers);
//!     supervisor.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The two shipped binaries wrap this library: `procvisord` (the daemon)
//! and `procvisorctl` (the control client).

pub mod config;
pub mod rpc;

mod core;
mod error;
mod events;
mod health;
mod policies;
mod process;
mod subscribers;

// ---- Public re-exports ----

pub use crate::core::{ReloadReport, Supervisor};
pub use config::{DaemonConfig, HealthCheckConfig, HealthCheckKind, ProgramConfig};
pub use error::{ConfigError, RuntimeError};
pub use events::{Bus, BusTap, Event, EventKind};
pub use health::{ProbeReport, Prober, ScriptProber, TcpProber};
pub use policies::BackoffPolicy;
pub use process::{Health, Process, ProcessState, ProcessStatus};
pub use rpc::{Controller, RpcServer};
pub use subscribers::{LogSubscriber, Subscribe, SubscriberSet};
