//! Health probing: pluggable pass/fail verdicts over a live child.
//!
//! A [`Prober`] is a capability with a single operation: [`Prober::probe`]
//! returns a [`ProbeReport`] and is bounded by the configured per-call
//! timeout (enforced inside each prober). Variants are selected by the
//! `healthcheck` tag of a program:
//!
//! - `tcp` → [`TcpProber`]: healthy iff a connection to `host:port` is
//!   accepted within the timeout.
//! - `script` → [`ScriptProber`]: healthy iff the command exits 0 within
//!   the timeout; on timeout the probe's process group is killed.
//! - `none` → no prober; the process is never forced UNHEALTHY.
//!
//! The probe *loop* (scheduling, consecutive-failure counting, and the
//! UNHEALTHY transition) is driven by the owning
//! [`Process`](crate::process::Process); probers only answer one question.
//!
//! Probe failures are never fatal to the daemon: each one counts as a
//! single verdict and nothing more.

mod script;
mod tcp;

use async_trait::async_trait;

use crate::config::{HealthCheckConfig, HealthCheckKind};

pub use script::ScriptProber;
pub use tcp::TcpProber;

/// Outcome of a single probe invocation.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    /// Verdict: true = healthy.
    pub healthy: bool,
    /// Human-readable detail (error text, exit status).
    pub message: String,
}

impl ProbeReport {
    /// A healthy verdict.
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
        }
    }

    /// An unhealthy verdict.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

/// A single-operation health capability.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Runs one probe, bounded by the configured timeout.
    async fn probe(&self) -> ProbeReport;
}

/// Builds the prober selected by the config tag, or `None` for `none`.
pub fn prober_for(cfg: &HealthCheckConfig) -> Option<Box<dyn Prober>> {
    match cfg.kind {
        HealthCheckKind::None => None,
        HealthCheckKind::Tcp => Some(Box::new(TcpProber::new(
            cfg.host.clone(),
            cfg.port.unwrap_or(0),
            cfg.timeout,
        ))),
        HealthCheckKind::Script => Some(Box::new(ScriptProber::new(
            cfg.command.clone().unwrap_or_default(),
            cfg.timeout,
        ))),
    }
}
