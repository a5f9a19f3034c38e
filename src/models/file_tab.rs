//! File tabs opened in the dashboard (annotations).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A file opened for annotation in a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileTab {
    /// Tab identifier.
    pub id: String,
    /// Owning workspace.
    pub workspace_path: String,
    /// Absolute file path.
    pub file_path: String,
    /// When the tab was opened.
    pub created_at: DateTime<Utc>,
}

impl FileTab {
    /// Construct a new tab with a generated identifier.
    #[must_use]
    pub fn new(workspace_path: String, file_path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workspace_path,
            file_path,
            created_at: Utc::now(),
        }
    }
}
