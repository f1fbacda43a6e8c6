//! # Control client.
//!
//! [`Controller`] speaks the framed JSON protocol over the daemon's Unix
//! socket: one request per call, one response back. It is the library
//! half of `procvisorctl` and doubles as the test harness for the
//! control plane.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::net::UnixStream;

use super::frame;

/// Client for the control socket.
pub struct Controller {
    socket_path: PathBuf,
}

impl Controller {
    /// Creates a client for the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Path this client talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends one request object and awaits the response object.
    pub async fn call(&self, request: Value) -> std::io::Result<Value> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        let payload = serde_json::to_vec(&request)?;
        frame::write_frame(&mut stream, &payload)
            .await
            .map_err(into_io)?;

        let response = frame::read_frame(&mut stream)
            .await
            .map_err(into_io)?
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty response")
            })?;

        serde_json::from_slice(&response).map_err(std::io::Error::from)
    }

    /// `status` — per-process table data.
    pub async fn status(&self) -> std::io::Result<Value> {
        self.call(json!({ "command": "status" })).await
    }

    /// `start {name}`.
    pub async fn start(&self, name: &str) -> std::io::Result<Value> {
        self.call(json!({ "command": "start", "name": name })).await
    }

    /// `stop {name}`.
    pub async fn stop(&self, name: &str) -> std::io::Result<Value> {
        self.call(json!({ "command": "stop", "name": name })).await
    }

    /// `restart {name, force}`.
    pub async fn restart(&self, name: &str, force: bool) -> std::io::Result<Value> {
        self.call(json!({ "command": "restart", "name": name, "force": force }))
            .await
    }

    /// `startgroup {name}`.
    pub async fn start_group(&self, name: &str) -> std::io::Result<Value> {
        self.call(json!({ "command": "startgroup", "name": name }))
            .await
    }

    /// `stopgroup {name}`.
    pub async fn stop_group(&self, name: &str) -> std::io::Result<Value> {
        self.call(json!({ "command": "stopgroup", "name": name }))
            .await
    }

    /// `reload` — returns the `{added, removed, changed}` diff.
    pub async fn reload(&self) -> std::io::Result<Value> {
        self.call(json!({ "command": "reload" })).await
    }
}

fn into_io(err: frame::FrameError) -> std::io::Error {
    match err {
        frame::FrameError::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
    }
}
