//! Terminal session model and creation request.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Role a terminal session plays inside its workspace.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TerminalRole {
    /// The single coordinating agent of a workspace.
    Architect,
    /// An implementation agent working in its own worktree.
    Builder,
    /// An ad-hoc utility shell.
    #[default]
    Shell,
}

impl TerminalRole {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::Builder => "builder",
            Self::Shell => "shell",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for an unknown role string.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "architect" => Ok(Self::Architect),
            "builder" => Ok(Self::Builder),
            "shell" => Ok(Self::Shell),
            other => Err(AppError::Db(format!("invalid terminal role: {other}"))),
        }
    }
}

/// A terminal session tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalRecord {
    /// Orchestrator-local session identifier.
    pub id: String,
    /// Program executed by the session.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Working directory of the child process.
    pub cwd: String,
    /// Human-readable tab label.
    pub label: String,
    /// Role inside the workspace.
    pub role: TerminalRole,
    /// Role-specific identifier, e.g. a builder id.
    pub role_id: Option<String>,
    /// Owning workspace, if any.
    pub workspace_path: Option<String>,
    /// PID of the real child process.
    pub pid: u32,
    /// Whether a Shellper keeps the child alive across restarts.
    pub persistent: bool,
    /// Shellper control socket (persistent sessions only).
    pub socket_path: Option<String>,
    /// PID of the Shellper process (persistent sessions only).
    pub shellper_pid: Option<u32>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TerminalRecord {
    /// Shellper socket as a path.
    #[must_use]
    pub fn socket(&self) -> Option<&Path> {
        self.socket_path.as_deref().map(Path::new)
    }

    /// Whether the session belongs to `workspace`.
    #[must_use]
    pub fn in_workspace(&self, workspace: &str) -> bool {
        self.workspace_path.as_deref() == Some(workspace)
    }
}

/// Generate a fresh session identifier.
#[must_use]
pub fn new_terminal_id() -> String {
    Uuid::new_v4().to_string()
}

/// Body of `POST /api/terminals`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalRequest {
    /// Program to execute.
    pub command: String,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; defaults to the workspace path.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Tab label; defaults to the command.
    #[serde(default)]
    pub label: Option<String>,
    /// Owning workspace.
    #[serde(default)]
    pub workspace_path: Option<String>,
    /// Session role.
    #[serde(default, rename = "type")]
    pub role: TerminalRole,
    /// Role-specific identifier.
    #[serde(default)]
    pub role_id: Option<String>,
    /// Back the session with a Shellper.
    #[serde(default)]
    pub persistent: bool,
}

impl CreateTerminalRequest {
    /// Reject requests that cannot produce a runnable session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the command is blank, the working
    /// directory is relative, or a builder session lacks a `roleId`.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(AppError::Validation("command must not be empty".into()));
        }
        if let Some(ref cwd) = self.cwd {
            if !Path::new(cwd).is_absolute() {
                return Err(AppError::Validation(format!(
                    "cwd must be an absolute path: {cwd}"
                )));
            }
        }
        if self.role == TerminalRole::Builder
            && self.role_id.as_deref().is_none_or(|id| id.trim().is_empty())
        {
            return Err(AppError::Validation(
                "builder sessions require a roleId".into(),
            ));
        }
        Ok(())
    }
}
