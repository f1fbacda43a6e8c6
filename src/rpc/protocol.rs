//! # Control-plane request/response schemas.
//!
//! Requests are JSON objects tagged by `command`; responses carry
//! `status: "ok"` plus command data, or `status: "error"` with a stable
//! machine code and a human message.
//!
//! Parsing distinguishes the error codes precisely:
//! - undecodable bytes → `INVALID_JSON`
//! - decodable but not an object / missing or bad fields → `INVALID_REQUEST`
//! - an object whose `command` is not in the command set → `UNKNOWN_COMMAND`

use serde::Deserialize;
use serde_json::{json, Value};

use crate::process::ProcessStatus;

/// The closed command set.
pub const COMMANDS: &[&str] = &[
    "status",
    "start",
    "stop",
    "restart",
    "startgroup",
    "stopgroup",
    "reload",
];

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidJson,
    InvalidRequest,
    UnknownCommand,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// A decoded control request.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Request {
    Status,
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    Restart {
        name: String,
        #[serde(default)]
        force: bool,
    },
    #[serde(rename = "startgroup")]
    StartGroup { name: String },
    #[serde(rename = "stopgroup")]
    StopGroup { name: String },
    Reload,
}

/// Parses a request payload, mapping failures to their error codes.
pub fn parse_request(payload: &[u8]) -> Result<Request, (ErrorCode, String)> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|err| (ErrorCode::InvalidJson, format!("invalid JSON: {err}")))?;

    let obj = value.as_object().ok_or((
        ErrorCode::InvalidRequest,
        "request must be a JSON object".to_string(),
    ))?;

    let command = obj.get("command").and_then(Value::as_str).ok_or((
        ErrorCode::InvalidRequest,
        "missing string field 'command'".to_string(),
    ))?;

    if !COMMANDS.contains(&command) {
        return Err((
            ErrorCode::UnknownCommand,
            format!("unknown command: {command}"),
        ));
    }

    serde_json::from_value(value.clone())
        .map_err(|err| (ErrorCode::InvalidRequest, format!("invalid request: {err}")))
}

/// Success response with a human message.
pub fn ok(message: impl Into<String>) -> Value {
    json!({ "status": "ok", "message": message.into() })
}

/// Error response with a stable code.
pub fn error(code: ErrorCode, message: impl Into<String>) -> Value {
    json!({ "status": "error", "code": code.as_str(), "message": message.into() })
}

/// One `status` row.
pub fn status_entry(status: &ProcessStatus) -> Value {
    json!({
        "name": status.name,
        "state": status.state.as_str(),
        "pid": status.pid,
        "uptime_seconds": status.uptime.map(|d| d.as_secs()),
        "health": status.healthy.map(|h| if h { "ok" } else { "fail" }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse() {
        assert_eq!(
            parse_request(br#"{"command":"status"}"#).unwrap(),
            Request::Status
        );
        assert_eq!(
            parse_request(br#"{"command":"start","name":"web"}"#).unwrap(),
            Request::Start { name: "web".into() }
        );
        assert_eq!(
            parse_request(br#"{"command":"restart","name":"web"}"#).unwrap(),
            Request::Restart {
                name: "web".into(),
                force: false
            }
        );
        assert_eq!(
            parse_request(br#"{"command":"restart","name":"web","force":true}"#).unwrap(),
            Request::Restart {
                name: "web".into(),
                force: true
            }
        );
        assert_eq!(
            parse_request(br#"{"command":"startgroup","name":"backend"}"#).unwrap(),
            Request::StartGroup {
                name: "backend".into()
            }
        );
    }

    #[test]
    fn bad_json_gets_invalid_json() {
        let (code, _) = parse_request(b"{nope").unwrap_err();
        assert_eq!(code, ErrorCode::InvalidJson);
    }

    #[test]
    fn non_object_gets_invalid_request() {
        let (code, _) = parse_request(b"[1,2,3]").unwrap_err();
        assert_eq!(code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn unknown_command_gets_its_own_code() {
        let (code, msg) = parse_request(br#"{"command":"explode"}"#).unwrap_err();
        assert_eq!(code, ErrorCode::UnknownCommand);
        assert!(msg.contains("explode"));
    }

    #[test]
    fn missing_name_gets_invalid_request() {
        let (code, _) = parse_request(br#"{"command":"start"}"#).unwrap_err();
        assert_eq!(code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn status_entry_uses_nulls_for_absent_fields() {
        use crate::process::{ProcessState, ProcessStatus};
        let entry = status_entry(&ProcessStatus {
            name: "web".into(),
            state: ProcessState::Stopped,
            pid: None,
            uptime: None,
            healthy: None,
        });
        assert_eq!(entry["state"], "STOPPED");
        assert!(entry["pid"].is_null());
        assert!(entry["uptime_seconds"].is_null());
        assert!(entry["health"].is_null());
    }
}
