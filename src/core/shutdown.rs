//! # OS signal handling.
//!
//! - [`wait_for_shutdown_signal`] completes when the daemon receives
//!   SIGTERM or SIGINT (plus Ctrl-C as a fallback).
//! - [`spawn_sighup_listener`] logs and ignores SIGHUP for the daemon's
//!   lifetime: reload is driven via the control socket, and an untouched
//!   SIGHUP must never kill a supervisor.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Waits for a termination signal (SIGTERM / SIGINT / Ctrl-C).
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

/// Spawns a task that consumes SIGHUP until the token is cancelled.
pub(crate) fn spawn_sighup_listener(token: CancellationToken) {
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(err) => {
            error!("cannot register SIGHUP handler: {err}");
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sighup.recv() => {
                    info!("SIGHUP received and ignored; use the control socket to reload");
                }
            }
        }
    });
}
