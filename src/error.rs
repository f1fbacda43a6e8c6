//! # Error types used by the supervisor runtime and configuration boundary.
//!
//! Two main enums:
//!
//! - [`ConfigError`] — rejection at the configuration boundary (parse time
//!   or hot reload). On startup these are fatal; on reload they abort the
//!   reload with no state change.
//! - [`RuntimeError`] — failures raised by the running daemon: singleton
//!   lock contention, unknown names in control requests, convergence
//!   timeouts, and shutdown overruns.
//!
//! Both provide `as_label()` — a short stable snake_case tag for logs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while loading or validating a configuration file.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A line could not be parsed as a section header or `key = value` pair.
    #[error("config syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A `[program:NAME]` section failed validation.
    #[error("program '{program}': {message}")]
    Validation {
        /// Offending program name.
        program: String,
        /// What was wrong with it.
        message: String,
    },

    /// The daemon section (`[procvisor]`) failed validation.
    #[error("{message}")]
    Daemon { message: String },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Syntax { .. } => "config_syntax",
            ConfigError::Validation { .. } => "config_validation",
            ConfigError::Daemon { .. } => "config_daemon",
        }
    }
}

/// Errors produced by the supervisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Another daemon instance holds the PID-file lock.
    #[error("pidfile {path} is locked by another running instance")]
    PidFileBusy { path: PathBuf },

    /// The PID file could not be created, locked, or written.
    #[error("pidfile {path}: {source}")]
    PidFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No managed process with this name exists.
    #[error("no such process: '{name}'")]
    ProcessNotFound { name: String },

    /// No group with this name exists.
    #[error("no such group: '{name}'")]
    GroupNotFound { name: String },

    /// A start command did not reach RUNNING within its wait window.
    #[error("process '{name}' did not reach RUNNING within {waited:?}")]
    StartTimeout { name: String, waited: Duration },

    /// A start command converged on a failure state instead of RUNNING.
    #[error("process '{name}' failed to start (state {state})")]
    StartFailed { name: String, state: String },

    /// Shutdown grace period was exceeded; the named processes had to be
    /// force-killed.
    #[error("shutdown timeout {grace:?} exceeded; force-killed: {stuck:?}")]
    GraceExceeded { grace: Duration, stuck: Vec<String> },

    /// Configuration rejection surfaced through a runtime operation (reload).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An I/O failure in the control plane (socket setup, signal registration).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::PidFileBusy { .. } => "pidfile_busy",
            RuntimeError::PidFile { .. } => "pidfile_io",
            RuntimeError::ProcessNotFound { .. } => "process_not_found",
            RuntimeError::GroupNotFound { .. } => "group_not_found",
            RuntimeError::StartTimeout { .. } => "start_timeout",
            RuntimeError::StartFailed { .. } => "start_failed",
            RuntimeError::GraceExceeded { .. } => "grace_exceeded",
            RuntimeError::Config(_) => "config",
            RuntimeError::Io(_) => "io",
        }
    }
}
