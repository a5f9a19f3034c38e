//! Cron task repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::cron::{CronResult, CronTask};
use crate::scheduler::loader::CronTaskDefinition;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for scheduled task records.
#[derive(Clone)]
pub struct CronRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct CronRow {
    workspace_path: String,
    name: String,
    schedule: String,
    enabled: i64,
    command: String,
    target: Option<String>,
    timeout_seconds: i64,
    last_run: Option<i64>,
    last_result: Option<String>,
    last_output: Option<String>,
}

impl CronRow {
    fn into_task(self) -> Result<CronTask> {
        let timeout_seconds = u64::try_from(self.timeout_seconds)
            .map_err(|e| AppError::Db(format!("invalid timeout_seconds: {e}")))?;
        Ok(CronTask {
            name: self.name,
            workspace_path: self.workspace_path,
            schedule: self.schedule,
            enabled: self.enabled != 0,
            command: self.command,
            target: self.target,
            timeout_seconds,
            last_run: self.last_run,
            last_result: self.last_result.as_deref().map(CronResult::parse).transpose()?,
            last_output: self.last_output,
        })
    }
}

// A user enable/disable override wins over the definition file's flag.
const SELECT_COLUMNS: &str = "SELECT workspace_path, name, schedule,
        COALESCE(enabled_override, enabled) AS enabled, command, target, timeout_seconds,
        last_run, last_result, last_output
     FROM cron_task";

impl CronRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Upsert a task definition and read the stored row back in one
    /// transaction. Run history and enable overrides are preserved.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn sync_definition(
        &self,
        workspace_path: &str,
        definition: &CronTaskDefinition,
    ) -> Result<CronTask> {
        let timeout = i64::try_from(definition.timeout_seconds)
            .map_err(|e| AppError::Db(format!("timeout_seconds too large: {e}")))?;
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO cron_task (workspace_path, name, schedule, enabled, command, target, timeout_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(workspace_path, name) DO UPDATE SET
                 schedule = excluded.schedule, enabled = excluded.enabled,
                 command = excluded.command, target = excluded.target,
                 timeout_seconds = excluded.timeout_seconds",
        )
        .bind(workspace_path)
        .bind(&definition.name)
        .bind(&definition.schedule)
        .bind(i64::from(definition.enabled))
        .bind(&definition.command)
        .bind(&definition.target)
        .bind(timeout)
        .execute(&mut *tx)
        .await?;

        let row: CronRow = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE workspace_path = ?1 AND name = ?2"
        ))
        .bind(workspace_path)
        .bind(&definition.name)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_task()
    }

    /// Remove tasks of `workspace_path` whose names are not in `keep`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn retain_only(&self, workspace_path: &str, keep: &[String]) -> Result<u64> {
        let mut removed = 0;
        for task in self.list(Some(workspace_path)).await? {
            if !keep.contains(&task.name) {
                let result =
                    sqlx::query("DELETE FROM cron_task WHERE workspace_path = ?1 AND name = ?2")
                        .bind(workspace_path)
                        .bind(&task.name)
                        .execute(self.db.as_ref())
                        .await?;
                removed += result.rows_affected();
            }
        }
        Ok(removed)
    }

    /// List tasks, optionally restricted to one workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self, workspace_path: Option<&str>) -> Result<Vec<CronTask>> {
        let rows: Vec<CronRow> = match workspace_path {
            Some(ws) => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE workspace_path = ?1 ORDER BY name ASC"
                ))
                .bind(ws)
                .fetch_all(self.db.as_ref())
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} ORDER BY workspace_path ASC, name ASC"
                ))
                .fetch_all(self.db.as_ref())
                .await?
            }
        };
        rows.into_iter().map(CronRow::into_task).collect()
    }

    /// Fetch one task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, workspace_path: &str, name: &str) -> Result<Option<CronTask>> {
        let row: Option<CronRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE workspace_path = ?1 AND name = ?2"
        ))
        .bind(workspace_path)
        .bind(name)
        .fetch_optional(self.db.as_ref())
        .await?;
        row.map(CronRow::into_task).transpose()
    }

    /// Find every task with `name` across workspaces.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<CronTask>> {
        let rows: Vec<CronRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} WHERE name = ?1 ORDER BY workspace_path ASC"
        ))
        .bind(name)
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(CronRow::into_task).collect()
    }

    /// Enable or disable a task regardless of its definition file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist, or
    /// `AppError::Db` if the update fails.
    pub async fn set_enabled(&self, workspace_path: &str, name: &str, enabled: bool) -> Result<CronTask> {
        let result = sqlx::query(
            "UPDATE cron_task SET enabled_override = ?1 WHERE workspace_path = ?2 AND name = ?3",
        )
        .bind(i64::from(enabled))
        .bind(workspace_path)
        .bind(name)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("cron task {name} not found")));
        }
        self.get(workspace_path, name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("cron task {name} not found")))
    }

    /// Record the outcome of a run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_run(
        &self,
        workspace_path: &str,
        name: &str,
        ran_at: i64,
        result: CronResult,
        output: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE cron_task SET last_run = ?1, last_result = ?2, last_output = ?3
             WHERE workspace_path = ?4 AND name = ?5",
        )
        .bind(ran_at)
        .bind(result.as_str())
        .bind(output)
        .bind(workspace_path)
        .bind(name)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }
}
