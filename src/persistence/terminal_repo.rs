//! Terminal session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::terminal::{TerminalRecord, TerminalRole};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for durable terminal session records.
#[derive(Clone)]
pub struct TerminalRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct TerminalRow {
    id: String,
    command: String,
    args: String,
    cwd: String,
    label: String,
    role: String,
    role_id: Option<String>,
    workspace_path: Option<String>,
    pid: i64,
    persistent: i64,
    socket_path: Option<String>,
    shellper_pid: Option<i64>,
    created_at: String,
}

impl TerminalRow {
    fn into_record(self) -> Result<TerminalRecord> {
        let args: Vec<String> = serde_json::from_str(&self.args)
            .map_err(|e| AppError::Db(format!("invalid args column: {e}")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        let pid = u32::try_from(self.pid)
            .map_err(|e| AppError::Db(format!("invalid pid {}: {e}", self.pid)))?;
        let shellper_pid = self
            .shellper_pid
            .map(u32::try_from)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid shellper_pid: {e}")))?;

        Ok(TerminalRecord {
            id: self.id,
            command: self.command,
            args,
            cwd: self.cwd,
            label: self.label,
            role: TerminalRole::parse(&self.role)?,
            role_id: self.role_id,
            workspace_path: self.workspace_path,
            pid,
            persistent: self.persistent != 0,
            socket_path: self.socket_path,
            shellper_pid,
            created_at,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT id, command, args, cwd, label, role, role_id, workspace_path,
        pid, persistent, socket_path, shellper_pid, created_at
     FROM terminal_session";

impl TerminalRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a terminal session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, record: &TerminalRecord) -> Result<()> {
        let args = serde_json::to_string(&record.args)
            .map_err(|e| AppError::Db(format!("failed to encode args: {e}")))?;

        sqlx::query(
            "INSERT INTO terminal_session (id, command, args, cwd, label, role, role_id,
                 workspace_path, pid, persistent, socket_path, shellper_pid, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&record.id)
        .bind(&record.command)
        .bind(&args)
        .bind(&record.cwd)
        .bind(&record.label)
        .bind(record.role.as_str())
        .bind(&record.role_id)
        .bind(&record.workspace_path)
        .bind(i64::from(record.pid))
        .bind(i64::from(record.persistent))
        .bind(&record.socket_path)
        .bind(record.shellper_pid.map(i64::from))
        .bind(record.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Retrieve a record by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, id: &str) -> Result<Option<TerminalRecord>> {
        let row: Option<TerminalRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(TerminalRow::into_record).transpose()
    }

    /// List every durable record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query or a row conversion fails.
    pub async fn list_all(&self) -> Result<Vec<TerminalRecord>> {
        let rows: Vec<TerminalRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY created_at ASC"))
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(TerminalRow::into_record).collect()
    }

    /// Delete a record. Deleting an absent record is not an error.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM terminal_session WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }

    /// Move a record to a new identifier, rewriting builder references in
    /// the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `old_id` does not exist, or
    /// `AppError::Db` if the transaction fails.
    pub async fn reassign_id(&self, old_id: &str, new_id: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let moved = sqlx::query("UPDATE terminal_session SET id = ?1 WHERE id = ?2")
            .bind(new_id)
            .bind(old_id)
            .execute(&mut *tx)
            .await?;
        if moved.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("terminal {old_id} not found")));
        }

        sqlx::query("UPDATE builder SET terminal_id = ?1 WHERE terminal_id = ?2")
            .bind(new_id)
            .bind(old_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
