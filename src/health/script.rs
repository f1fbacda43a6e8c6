//! # Script prober.
//!
//! Runs a shell command in its own process group and maps the outcome:
//! exit code 0 ⇒ healthy; any other code, a terminating signal, or a
//! timeout ⇒ unhealthy. On timeout the whole probe process group gets
//! SIGKILL so a wedged check cannot accumulate children.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::time;
use tracing::debug;

use super::{ProbeReport, Prober};

/// Probes by running a command and inspecting its exit status.
pub struct ScriptProber {
    command: String,
    timeout: Duration,
}

impl ScriptProber {
    /// Creates a prober for the shell command with the given timeout.
    pub fn new(command: String, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl Prober for ScriptProber {
    async fn probe(&self) -> ProbeReport {
        let mut child = match Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => return ProbeReport::unhealthy(format!("failed to spawn check: {err}")),
        };

        let pid = child.id();
        match time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => ProbeReport::healthy("check exited 0"),
            Ok(Ok(status)) => match status.code() {
                Some(code) => ProbeReport::unhealthy(format!("check exited with code {code}")),
                None => ProbeReport::unhealthy("check terminated by signal"),
            },
            Ok(Err(err)) => ProbeReport::unhealthy(format!("failed to reap check: {err}")),
            Err(_elapsed) => {
                if let Some(pid) = pid {
                    // The check got its own group at spawn; take the whole tree down.
                    if let Err(err) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                        debug!("killpg on timed-out check failed: {err}");
                    }
                }
                let _ = child.wait().await;
                ProbeReport::unhealthy(format!("check timed out after {:?}", self.timeout))
            }
        }
    }
}
