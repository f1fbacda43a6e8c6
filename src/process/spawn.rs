//! # Child spawn and process-group signalling primitives.
//!
//! [`launch`] builds and spawns one child for a program instance:
//! - argv[0] is resolved against the **child** environment's PATH when it
//!   is not an absolute or relative path;
//! - the child environment *replaces* the inherited one;
//! - stdout/stderr are redirected at spawn time into the instance's log
//!   files (`%(process_num)s` substituted); open failures degrade to
//!   `/dev/null` with a warning, never blocking the start;
//! - before exec the child becomes the leader of a fresh session (so the
//!   whole tree can be signalled as one group), asks for SIGKILL on
//!   parent death (Linux), and — when a user is configured — applies
//!   supplementary groups, gid, then uid, exiting 126 on any failure.
//!
//! Uid/gid/groups are resolved **before** forking; only async-signal-safe
//! calls run between fork and exec.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::warn;

use crate::config::{expand_logfile, ProgramConfig};

/// Why a spawn attempt failed.
#[derive(Error, Debug)]
pub(crate) enum SpawnError {
    /// Retrying cannot help (command not found, permission denied,
    /// unresolvable user).
    #[error("{0}")]
    NonRecoverable(String),
    /// Worth retrying (resource exhaustion, transient I/O).
    #[error("{0}")]
    Transient(String),
}

impl SpawnError {
    pub(crate) fn is_non_recoverable(&self) -> bool {
        matches!(self, SpawnError::NonRecoverable(_))
    }
}

/// A freshly spawned child and its PID (== its process group, fresh session).
pub(crate) struct SpawnedChild {
    pub child: Child,
    pub pid: u32,
}

/// Credentials resolved ahead of fork.
struct ChildIds {
    uid: libc::uid_t,
    gid: libc::gid_t,
    groups: Vec<libc::gid_t>,
}

/// Spawns one child for the given program instance.
pub(crate) fn launch(config: &ProgramConfig) -> Result<SpawnedChild, SpawnError> {
    let argv0 = config
        .command
        .first()
        .ok_or_else(|| SpawnError::NonRecoverable("empty command".to_string()))?;
    let program = resolve_argv0(argv0, config.environment.get("PATH").map(String::as_str))?;
    let ids = resolve_user(config)?;

    let mut cmd = Command::new(&program);
    cmd.args(&config.command[1..])
        .env_clear()
        .envs(&config.environment)
        .stdin(Stdio::null())
        .stdout(open_log_target(
            config.stdout_logfile.as_deref(),
            config.process_num,
            &config.name,
        ))
        .stderr(open_log_target(
            config.stderr_logfile.as_deref(),
            config.process_num,
            &config.name,
        ))
        .kill_on_drop(true);
    if let Some(dir) = &config.directory {
        cmd.current_dir(dir);
    }

    unsafe {
        cmd.pre_exec(move || {
            // Fresh session: the child leads its own process group, so
            // stop signals reach the entire tree.
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL, 0, 0, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            if let Some(ids) = &ids {
                if libc::setgroups(ids.groups.len(), ids.groups.as_ptr()) < 0
                    || libc::setgid(ids.gid) < 0
                    || libc::setuid(ids.uid) < 0
                {
                    libc::_exit(126);
                }
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|err| match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            SpawnError::NonRecoverable(format!("cannot exec '{}': {err}", program.display()))
        }
        _ => SpawnError::Transient(format!("spawn of '{}' failed: {err}", program.display())),
    })?;

    let pid = child
        .id()
        .ok_or_else(|| SpawnError::Transient("spawned child has no pid".to_string()))?;

    Ok(SpawnedChild { child, pid })
}

/// Sends a signal to a child's process group, tolerating ESRCH (the group
/// is already gone, which is the goal anyway).
pub(crate) fn signal_group(pid: u32, signal: Signal) -> io::Result<()> {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(err) => Err(io::Error::from_raw_os_error(err as i32)),
    }
}

/// Resolves argv[0]: paths with a separator pass through, bare names are
/// searched in the **child** environment's PATH.
fn resolve_argv0(argv0: &str, child_path: Option<&str>) -> Result<PathBuf, SpawnError> {
    if argv0.contains('/') {
        return Ok(PathBuf::from(argv0));
    }
    let search = child_path.unwrap_or("");
    for dir in search.split(':').filter(|d| !d.is_empty()) {
        let candidate = Path::new(dir).join(argv0);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(SpawnError::NonRecoverable(format!(
        "command '{argv0}' not found in PATH"
    )))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Resolves uid/gid/supplementary groups ahead of fork.
fn resolve_user(config: &ProgramConfig) -> Result<Option<ChildIds>, SpawnError> {
    let Some(username) = &config.user else {
        return Ok(None);
    };
    let user = nix::unistd::User::from_name(username)
        .map_err(|err| SpawnError::NonRecoverable(format!("cannot resolve user '{username}': {err}")))?
        .ok_or_else(|| SpawnError::NonRecoverable(format!("user '{username}' does not exist")))?;

    let cname = std::ffi::CString::new(username.as_str())
        .map_err(|_| SpawnError::NonRecoverable(format!("user '{username}' contains NUL")))?;
    let groups = nix::unistd::getgrouplist(&cname, user.gid)
        .map_err(|err| SpawnError::NonRecoverable(format!("group lookup for '{username}' failed: {err}")))?;

    Ok(Some(ChildIds {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        groups: groups.iter().map(|g| g.as_raw()).collect(),
    }))
}

/// Opens a log target in append mode, substituting the instance index.
fn open_log_target(path: Option<&str>, process_num: u32, name: &str) -> Stdio {
    let Some(path) = path else {
        return Stdio::null();
    };
    let expanded = expand_logfile(path, process_num);
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded)
    {
        Ok(file) => Stdio::from(file),
        Err(err) => {
            warn!(process = name, path = %expanded, "cannot open log target, output dropped: {err}");
            Stdio::null()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_argv0_passes_through() {
        let resolved = resolve_argv0("/bin/true", None).unwrap();
        assert_eq!(resolved, PathBuf::from("/bin/true"));
    }

    #[test]
    fn bare_name_resolves_against_child_path() {
        let resolved = resolve_argv0("sh", Some("/nonexistent:/bin:/usr/bin")).unwrap();
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn missing_command_is_non_recoverable() {
        let err = resolve_argv0("definitely-not-a-command", Some("/bin")).unwrap_err();
        assert!(err.is_non_recoverable());
    }

    #[tokio::test]
    async fn launch_gives_child_its_own_group() {
        let mut cfg = ProgramConfig::new("grp-test", vec!["/bin/sleep".into(), "5".into()]);
        cfg.environment.insert("PATH".into(), "/bin:/usr/bin".into());
        let SpawnedChild { mut child, pid } = launch(&cfg).unwrap();

        let pgid = nix::unistd::getpgid(Some(Pid::from_raw(pid as i32))).unwrap();
        assert_eq!(pgid.as_raw(), pid as i32, "child must lead its own group");

        signal_group(pid, Signal::SIGKILL).unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}
