//! Builder metadata repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::builder::{Builder, BuilderStatus, BuilderType, GateInfo};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for builder records.
#[derive(Clone)]
pub struct BuilderRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct BuilderRow {
    id: String,
    workspace_path: String,
    name: String,
    port: Option<i64>,
    status: String,
    phase: Option<String>,
    worktree: String,
    branch: Option<String>,
    terminal_id: Option<String>,
    cli_session_id: Option<String>,
    builder_type: String,
    issue_number: Option<i64>,
    gate_name: Option<String>,
    gate_requested_at: Option<String>,
}

impl BuilderRow {
    fn into_builder(self) -> Result<Builder> {
        let gate = match (self.gate_name, self.gate_requested_at) {
            (Some(gate_name), Some(requested_at)) => Some(GateInfo {
                gate_name,
                requested_at: chrono::DateTime::parse_from_rfc3339(&requested_at)
                    .map_err(|e| AppError::Db(format!("invalid gate_requested_at: {e}")))?
                    .with_timezone(&Utc),
            }),
            _ => None,
        };
        let port = self
            .port
            .map(u16::try_from)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid builder port: {e}")))?;

        Ok(Builder {
            id: self.id,
            workspace_path: self.workspace_path,
            name: self.name,
            port,
            status: BuilderStatus::parse(&self.status)?,
            phase: self.phase,
            worktree: self.worktree,
            branch: self.branch,
            terminal_id: self.terminal_id,
            cli_session_id: self.cli_session_id,
            builder_type: BuilderType::parse(&self.builder_type)?,
            issue_number: self.issue_number,
            gate,
        })
    }
}

impl BuilderRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a builder record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn upsert(&self, builder: &Builder) -> Result<()> {
        sqlx::query(
            "INSERT INTO builder (id, workspace_path, name, port, status, phase, worktree, branch,
                 terminal_id, cli_session_id, builder_type, issue_number, gate_name, gate_requested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(workspace_path, id) DO UPDATE SET
                 name = excluded.name, port = excluded.port, status = excluded.status,
                 phase = excluded.phase, worktree = excluded.worktree, branch = excluded.branch,
                 terminal_id = excluded.terminal_id, cli_session_id = excluded.cli_session_id,
                 builder_type = excluded.builder_type, issue_number = excluded.issue_number,
                 gate_name = excluded.gate_name, gate_requested_at = excluded.gate_requested_at",
        )
        .bind(&builder.id)
        .bind(&builder.workspace_path)
        .bind(&builder.name)
        .bind(builder.port.map(i64::from))
        .bind(builder.status.as_str())
        .bind(&builder.phase)
        .bind(&builder.worktree)
        .bind(&builder.branch)
        .bind(&builder.terminal_id)
        .bind(&builder.cli_session_id)
        .bind(builder.builder_type.as_str())
        .bind(builder.issue_number)
        .bind(builder.gate.as_ref().map(|g| g.gate_name.clone()))
        .bind(builder.gate.as_ref().map(|g| g.requested_at.to_rfc3339()))
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Fetch one builder.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, workspace_path: &str, id: &str) -> Result<Option<Builder>> {
        let row: Option<BuilderRow> =
            sqlx::query_as("SELECT * FROM builder WHERE workspace_path = ?1 AND id = ?2")
                .bind(workspace_path)
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;
        row.map(BuilderRow::into_builder).transpose()
    }

    /// List a workspace's builders ordered by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_workspace(&self, workspace_path: &str) -> Result<Vec<Builder>> {
        let rows: Vec<BuilderRow> =
            sqlx::query_as("SELECT * FROM builder WHERE workspace_path = ?1 ORDER BY id ASC")
                .bind(workspace_path)
                .fetch_all(self.db.as_ref())
                .await?;
        rows.into_iter().map(BuilderRow::into_builder).collect()
    }

    /// Delete one builder record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, workspace_path: &str, id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM builder WHERE workspace_path = ?1 AND id = ?2")
            .bind(workspace_path)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
