//! Runtime core: orchestration and whole-system lifecycle.
//!
//! The only public API re-exported from here is [`Supervisor`] (and its
//! [`ReloadReport`]). Everything else is an internal building block the
//! supervisor wires together.
//!
//! ## Files & responsibilities
//! - **supervisor.rs**: public facade; owns the registry, group index,
//!   bus, and control plane; drives startup, reload, and graceful
//!   shutdown.
//! - **registry.rs**: the supervisor-owned map of supervision task
//!   handles, mutated only under its coarse lock.
//! - **pidfile.rs**: exclusive advisory lock enforcing single-instance
//!   operation.
//! - **shutdown.rs**: OS signal plumbing (SIGTERM/SIGINT terminate,
//!   SIGHUP is logged and ignored).
//!
//! ## Shutdown timeline
//! ```text
//! signal → publish ShutdownRequested → release pidfile → stop RPC
//!        → stop every process (whole-system deadline)
//!        → SIGKILL stragglers → cancel tokens, join supervision tasks
//!        → AllStoppedWithin | GraceExceeded → drain subscribers
//! ```

mod pidfile;
mod registry;
mod shutdown;
mod supervisor;

pub use supervisor::{ReloadReport, Supervisor};
