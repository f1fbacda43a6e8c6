//! The per-program supervision engine.
//!
//! ## Files & responsibilities
//! - **state.rs**: the lifecycle state enum and the probe-derived health
//!   tri-state.
//! - **spawn.rs**: spawn and process-group signalling primitives (fresh
//!   session, parent-death signal, user switch, log redirection).
//! - **entity.rs**: [`Process`] — the intent flag, the state record, the
//!   supervision loop, the probe loop, and the command intake.

mod entity;
mod spawn;
mod state;

pub use entity::{Process, ProcessStatus};
pub use state::{Health, ProcessState};
