//! File tab repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::file_tab::FileTab;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for file tab records.
#[derive(Clone)]
pub struct FileTabRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct FileTabRow {
    id: String,
    workspace_path: String,
    file_path: String,
    created_at: String,
}

impl FileTabRow {
    fn into_tab(self) -> Result<FileTab> {
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);

        Ok(FileTab {
            id: self.id,
            workspace_path: self.workspace_path,
            file_path: self.file_path,
            created_at,
        })
    }
}

/// Escape `LIKE` metacharacters so a path prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

impl FileTabRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new file tab.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, tab: &FileTab) -> Result<FileTab> {
        sqlx::query(
            "INSERT INTO file_tab (id, workspace_path, file_path, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&tab.id)
        .bind(&tab.workspace_path)
        .bind(&tab.file_path)
        .bind(tab.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(tab.clone())
    }

    /// List a workspace's tabs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_workspace(&self, workspace_path: &str) -> Result<Vec<FileTab>> {
        let rows: Vec<FileTabRow> = sqlx::query_as(
            "SELECT id, workspace_path, file_path, created_at
             FROM file_tab
             WHERE workspace_path = ?1
             ORDER BY created_at ASC",
        )
        .bind(workspace_path)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(FileTabRow::into_tab).collect()
    }

    /// Delete one tab.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, workspace_path: &str, id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_tab WHERE workspace_path = ?1 AND id = ?2")
            .bind(workspace_path)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every tab of a workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_for_workspace(&self, workspace_path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_tab WHERE workspace_path = ?1")
            .bind(workspace_path)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every tab whose file lies under `prefix` (a torn-down worktree).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_by_path_prefix(&self, prefix: &str) -> Result<u64> {
        let trimmed = prefix.trim_end_matches(['/', '\\']);
        let under = like_prefix(&format!("{trimmed}/"));
        let result = sqlx::query(
            "DELETE FROM file_tab WHERE file_path = ?1 OR file_path LIKE ?2 ESCAPE '\\'",
        )
        .bind(trimmed)
        .bind(&under)
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}
