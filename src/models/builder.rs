//! Builder metadata persisted alongside its backing terminal session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Progress status reported by a builder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuilderStatus {
    /// Worktree and session are being prepared.
    Spawning,
    /// Actively working.
    Implementing,
    /// Waiting on a gate.
    Blocked,
    /// Pull request open.
    Pr,
    /// Work merged or abandoned.
    Complete,
}

impl BuilderStatus {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Implementing => "implementing",
            Self::Blocked => "blocked",
            Self::Pr => "pr",
            Self::Complete => "complete",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for an unknown status.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "spawning" => Ok(Self::Spawning),
            "implementing" => Ok(Self::Implementing),
            "blocked" => Ok(Self::Blocked),
            "pr" => Ok(Self::Pr),
            "complete" => Ok(Self::Complete),
            other => Err(AppError::Db(format!("invalid builder status: {other}"))),
        }
    }
}

/// Kind of work a builder was spawned for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuilderType {
    /// Implements a written spec.
    Spec,
    /// Fixes a reported issue.
    Bugfix,
    /// Free-form task.
    Task,
}

impl BuilderType {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spec => "spec",
            Self::Bugfix => "bugfix",
            Self::Task => "task",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for an unknown type.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "spec" => Ok(Self::Spec),
            "bugfix" => Ok(Self::Bugfix),
            "task" => Ok(Self::Task),
            other => Err(AppError::Db(format!("invalid builder type: {other}"))),
        }
    }
}

/// Approval checkpoint a blocked builder waits on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GateInfo {
    /// Gate name, e.g. `spec-approval`.
    pub gate_name: String,
    /// When the approval was requested.
    pub requested_at: DateTime<Utc>,
}

/// Durable builder record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Builder {
    /// Builder identifier, unique per workspace.
    pub id: String,
    /// Owning workspace.
    pub workspace_path: String,
    /// Display name.
    pub name: String,
    /// Port the builder's terminal is published on.
    pub port: Option<u16>,
    /// Current status.
    pub status: BuilderStatus,
    /// Free-form phase within the status.
    pub phase: Option<String>,
    /// Git worktree directory.
    pub worktree: String,
    /// Git branch.
    pub branch: Option<String>,
    /// Backing terminal session.
    pub terminal_id: Option<String>,
    /// Agent CLI session handle.
    pub cli_session_id: Option<String>,
    /// Work kind.
    #[serde(rename = "type")]
    pub builder_type: BuilderType,
    /// Linked issue number.
    pub issue_number: Option<i64>,
    /// Pending gate when blocked.
    pub gate: Option<GateInfo>,
}

/// Body of `PUT /workspace/:encodedPath/api/builders/:builderId`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertBuilderRequest {
    /// Display name; defaults to the builder id.
    #[serde(default)]
    pub name: Option<String>,
    /// Published port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Current status.
    pub status: BuilderStatus,
    /// Phase within the status.
    #[serde(default)]
    pub phase: Option<String>,
    /// Git worktree directory.
    pub worktree: String,
    /// Git branch.
    #[serde(default)]
    pub branch: Option<String>,
    /// Backing terminal session.
    #[serde(default)]
    pub terminal_id: Option<String>,
    /// Agent CLI session handle.
    #[serde(default)]
    pub cli_session_id: Option<String>,
    /// Work kind.
    #[serde(rename = "type")]
    pub builder_type: BuilderType,
    /// Linked issue number.
    #[serde(default)]
    pub issue_number: Option<i64>,
    /// Pending gate.
    #[serde(default)]
    pub gate: Option<GateInfo>,
}

impl UpsertBuilderRequest {
    /// Build the durable record for `id` in `workspace_path`.
    #[must_use]
    pub fn into_builder(self, id: String, workspace_path: String) -> Builder {
        Builder {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            workspace_path,
            port: self.port,
            status: self.status,
            phase: self.phase,
            worktree: self.worktree,
            branch: self.branch,
            terminal_id: self.terminal_id,
            cli_session_id: self.cli_session_id,
            builder_type: self.builder_type,
            issue_number: self.issue_number,
            gate: self.gate,
        }
    }
}
