//! Workspaces known to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workspace that has been activated at least once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KnownWorkspace {
    /// Canonical workspace path.
    pub path: String,
    /// Whether sessions may currently be created for it.
    pub active: bool,
    /// Dashboard port; architect and builders follow it.
    pub base_port: u16,
    /// Last activation time.
    pub last_activated_at: DateTime<Utc>,
}
