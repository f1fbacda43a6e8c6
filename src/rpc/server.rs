//! # Control socket server.
//!
//! A Unix stream socket bound at the configured path. Binding removes a
//! stale socket from a prior run, then creates the new one under
//! `umask(0o177)` so it is born mode 0600 — there is no window in which
//! the socket is world-accessible.
//!
//! Each accepted connection gets its own task and serves framed requests
//! until the peer closes. Requests on different connections run
//! concurrently with no server-side locking; correctness comes from the
//! per-process state locks. A malformed frame aborts only its own
//! connection; malformed JSON inside a well-formed frame is answered and
//! the connection stays open.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::Supervisor;
use crate::error::RuntimeError;

use super::frame::{self, FrameError};
use super::protocol::{self, ErrorCode, Request};

/// Accepts control connections and dispatches to the supervisor.
pub struct RpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl RpcServer {
    /// Binds the control socket, replacing a stale one.
    pub fn bind(path: &Path) -> std::io::Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        // Restrictive umask makes the socket owner-only at creation.
        let old_umask = unsafe { libc::umask(0o177) };
        let bound = UnixListener::bind(path);
        unsafe { libc::umask(old_umask) };

        Ok(Self {
            listener: bound?,
            path: path.to_path_buf(),
        })
    }

    /// Serves until the token is cancelled; unlinks the socket on exit.
    pub async fn serve(self, supervisor: Arc<Supervisor>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let sup = Arc::clone(&supervisor);
                        let conn_token = token.child_token();
                        tokio::spawn(handle_connection(stream, sup, conn_token));
                    }
                    Err(err) => {
                        // Accept failures are transient (fd pressure);
                        // keep serving.
                        warn!("accept failed: {err}");
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Serves one connection: read frame → dispatch → write frame, repeat.
async fn handle_connection(
    mut stream: UnixStream,
    supervisor: Arc<Supervisor>,
    token: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            _ = token.cancelled() => break,
            read = frame::read_frame(&mut stream) => match read {
                Ok(Some(payload)) => payload,
                Ok(None) => break,
                Err(FrameError::TooLarge(n)) => {
                    let response = protocol::error(
                        ErrorCode::InvalidRequest,
                        format!("message too large: {n} bytes"),
                    );
                    let _ = write_response(&mut stream, &response).await;
                    break;
                }
                Err(FrameError::Io(err)) => {
                    debug!("connection read failed: {err}");
                    break;
                }
            }
        };

        let response = dispatch(&supervisor, &payload).await;
        if write_response(&mut stream, &response).await.is_err() {
            break;
        }
    }
}

async fn write_response(stream: &mut UnixStream, response: &Value) -> Result<(), FrameError> {
    let bytes = serde_json::to_vec(response).unwrap_or_else(|_| b"{}".to_vec());
    frame::write_frame(stream, &bytes).await
}

/// Parses and executes one request, always producing a response object.
async fn dispatch(supervisor: &Arc<Supervisor>, payload: &[u8]) -> Value {
    match protocol::parse_request(payload) {
        Err((code, message)) => protocol::error(code, message),
        Ok(request) => execute(supervisor, request).await,
    }
}

async fn execute(supervisor: &Arc<Supervisor>, request: Request) -> Value {
    match request {
        Request::Status => {
            let entries: Vec<Value> = supervisor
                .status()
                .await
                .iter()
                .map(protocol::status_entry)
                .collect();
            serde_json::json!({
                "status": "ok",
                "message": format!("{} processes", entries.len()),
                "processes": entries,
            })
        }
        Request::Start { name } => match supervisor.start_process(&name).await {
            Ok(()) => protocol::ok(format!("started {name}")),
            Err(err) => runtime_error(err),
        },
        Request::Stop { name } => match supervisor.stop_process(&name).await {
            Ok(()) => protocol::ok(format!("stopped {name}")),
            Err(err) => runtime_error(err),
        },
        Request::Restart { name, force } => match supervisor.restart_process(&name, force).await {
            Ok(()) => protocol::ok(format!("restarted {name}")),
            Err(err) => runtime_error(err),
        },
        Request::StartGroup { name } => match supervisor.start_group(&name).await {
            Ok(()) => protocol::ok(format!("started group {name}")),
            Err(err) => runtime_error(err),
        },
        Request::StopGroup { name } => match supervisor.stop_group(&name).await {
            Ok(()) => protocol::ok(format!("stopped group {name}")),
            Err(err) => runtime_error(err),
        },
        Request::Reload => match supervisor.reload().await {
            Ok(report) => serde_json::json!({
                "status": "ok",
                "message": "reload complete",
                "added": report.added,
                "removed": report.removed,
                "changed": report.changed,
            }),
            Err(err) => protocol::error(ErrorCode::InternalError, format!("reload failed: {err}")),
        },
    }
}

/// Maps runtime errors onto the closed code set: requests that reference
/// a nonexistent entity are the client's fault, everything else is ours.
fn runtime_error(err: RuntimeError) -> Value {
    let code = match err {
        RuntimeError::ProcessNotFound { .. } | RuntimeError::GroupNotFound { .. } => {
            ErrorCode::InvalidRequest
        }
        _ => ErrorCode::InternalError,
    };
    protocol::error(code, err.to_string())
}
