//! Known workspace repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::workspace::KnownWorkspace;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for activated workspaces and their port blocks.
#[derive(Clone)]
pub struct WorkspaceRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    path: String,
    active: i64,
    base_port: i64,
    last_activated_at: String,
}

impl WorkspaceRow {
    fn into_workspace(self) -> Result<KnownWorkspace> {
        let last_activated_at = chrono::DateTime::parse_from_rfc3339(&self.last_activated_at)
            .map_err(|e| AppError::Db(format!("invalid last_activated_at: {e}")))?
            .with_timezone(&Utc);
        let base_port = u16::try_from(self.base_port)
            .map_err(|e| AppError::Db(format!("invalid base_port: {e}")))?;
        Ok(KnownWorkspace {
            path: self.path,
            active: self.active != 0,
            base_port,
            last_activated_at,
        })
    }
}

/// Lowest block start at or above `start` not present in `used`.
fn lowest_free_port(used: &[i64], start: u16, block: u16) -> Option<u16> {
    let mut candidate = start;
    loop {
        if !used.contains(&i64::from(candidate)) {
            return Some(candidate);
        }
        candidate = candidate.checked_add(block)?;
    }
}

impl WorkspaceRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Mark a workspace active, allocating a port block on first activation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` when the port range is exhausted, or
    /// `AppError::Db` if the transaction fails.
    pub async fn activate(&self, path: &str, port_start: u16, block: u16) -> Result<KnownWorkspace> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;

        let updated = sqlx::query(
            "UPDATE known_workspace SET active = 1, last_activated_at = ?1 WHERE path = ?2",
        )
        .bind(&now)
        .bind(path)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let used: Vec<(i64,)> = sqlx::query_as("SELECT base_port FROM known_workspace")
                .fetch_all(&mut *tx)
                .await?;
            let used: Vec<i64> = used.into_iter().map(|(port,)| port).collect();
            let base_port = lowest_free_port(&used, port_start, block)
                .ok_or_else(|| AppError::Conflict("no free dashboard port block".into()))?;

            sqlx::query(
                "INSERT INTO known_workspace (path, active, base_port, last_activated_at)
                 VALUES (?1, 1, ?2, ?3)",
            )
            .bind(path)
            .bind(i64::from(base_port))
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        let row: WorkspaceRow = sqlx::query_as(
            "SELECT path, active, base_port, last_activated_at FROM known_workspace WHERE path = ?1",
        )
        .bind(path)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_workspace()
    }

    /// Mark a workspace inactive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace was never activated.
    pub async fn deactivate(&self, path: &str) -> Result<KnownWorkspace> {
        let result = sqlx::query("UPDATE known_workspace SET active = 0 WHERE path = ?1")
            .bind(path)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("workspace {path} not known")));
        }
        self.get(path)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("workspace {path} not known")))
    }

    /// Fetch one workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, path: &str) -> Result<Option<KnownWorkspace>> {
        let row: Option<WorkspaceRow> = sqlx::query_as(
            "SELECT path, active, base_port, last_activated_at FROM known_workspace WHERE path = ?1",
        )
        .bind(path)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(WorkspaceRow::into_workspace).transpose()
    }

    /// List every known workspace, most recently activated first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_all(&self) -> Result<Vec<KnownWorkspace>> {
        let rows: Vec<WorkspaceRow> = sqlx::query_as(
            "SELECT path, active, base_port, last_activated_at
             FROM known_workspace ORDER BY last_activated_at DESC",
        )
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(WorkspaceRow::into_workspace).collect()
    }

    /// List active workspaces.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active(&self) -> Result<Vec<KnownWorkspace>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|ws| ws.active)
            .collect())
    }
}
