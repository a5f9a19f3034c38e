//! Wire types for the Shellper control socket and readiness line.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "status"}
//! {"command": "input", "data": "ls -la\n"}
//! {"command": "replay"}
//! {"command": "terminate"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "unknown command"}
//! ```
//!
//! Before serving, the Shellper writes one [`ReadyLine`] to its stdout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Control request sent to a Shellper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ShellperRequest {
    /// Report the child's identity and state.
    Status,
    /// Write `data` to the child's stdin.
    Input {
        /// Raw text to write.
        data: String,
    },
    /// Return the retained output of the child.
    Replay,
    /// Kill the child and exit.
    Terminate,
}

/// Response to a [`ShellperRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellperResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ShellperResponse {
    /// Successful response carrying `data`.
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response carrying `message`.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Payload of a `status` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShellperStatus {
    /// Session the Shellper serves.
    pub session_id: String,
    /// Tab label.
    pub label: String,
    /// PID of the real child.
    pub pid: u32,
    /// PID of the Shellper itself.
    pub shellper_pid: u32,
    /// When the child was started.
    pub started_at: DateTime<Utc>,
    /// Whether the child is still running.
    pub running: bool,
}

/// Single line a Shellper prints to stdout once it is serving, or when it
/// failed to start its child.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadyLine {
    /// Whether the child started.
    pub ok: bool,
    /// PID of the real child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// PID of the Shellper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shellper_pid: Option<u32>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReadyLine {
    /// Readiness report for a running child.
    #[must_use]
    pub fn ready(pid: u32, shellper_pid: u32) -> Self {
        Self {
            ok: true,
            pid: Some(pid),
            shellper_pid: Some(shellper_pid),
            error: None,
        }
    }

    /// Startup failure report.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            pid: None,
            shellper_pid: None,
            error: Some(message.into()),
        }
    }
}
