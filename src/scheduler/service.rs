//! Scheduler service: syncs task definitions, runs due tasks, and delivers
//! result summaries to sessions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::cron::is_due;
use super::loader::load_definitions;
use super::runner::{run_command, RunOutcome};
use crate::models::cron::{CronResult, CronTask};
use crate::models::terminal::TerminalRole;
use crate::orchestrator::registry::TerminalRegistry;
use crate::persistence::builder_repo::BuilderRepo;
use crate::persistence::cron_repo::CronRepo;
use crate::persistence::db::Database;
use crate::persistence::workspace_repo::WorkspaceRepo;
use crate::workspace::is_excluded_workspace;
use crate::{AppError, Result};

/// Target name addressing a workspace's architect session.
pub const ARCHITECT_TARGET: &str = "architect";

/// Result of one task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    /// Task name.
    pub name: String,
    /// Owning workspace.
    pub workspace_path: String,
    /// Outcome.
    pub result: CronResult,
    /// Truncated output.
    pub output: String,
    /// Epoch seconds the run started.
    pub ran_at: i64,
    /// Whether a summary reached the target session.
    pub delivered: bool,
}

/// Runs cron tasks of active workspaces.
pub struct Scheduler {
    cron: CronRepo,
    workspaces: WorkspaceRepo,
    builders: BuilderRepo,
    registry: Arc<TerminalRegistry>,
    transient_prefixes: Vec<PathBuf>,
    in_flight: Mutex<HashSet<(String, String)>>,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        db: Arc<Database>,
        registry: Arc<TerminalRegistry>,
        transient_prefixes: Vec<PathBuf>,
    ) -> Self {
        Self {
            cron: CronRepo::new(Arc::clone(&db)),
            workspaces: WorkspaceRepo::new(Arc::clone(&db)),
            builders: BuilderRepo::new(db),
            registry,
            transient_prefixes,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Task store.
    #[must_use]
    pub fn repo(&self) -> &CronRepo {
        &self.cron
    }

    /// Reload a workspace's definition files into the task table. Tasks
    /// whose file disappeared are removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the task table cannot be updated.
    pub async fn sync_workspace(&self, workspace: &str) -> Result<Vec<CronTask>> {
        let definitions = load_definitions(Path::new(workspace));
        let mut tasks = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            tasks.push(self.cron.sync_definition(workspace, definition).await?);
        }
        let names: Vec<String> = definitions.into_iter().map(|d| d.name).collect();
        let removed = self.cron.retain_only(workspace, &names).await?;
        if removed > 0 {
            info!(workspace, removed, "removed cron tasks with no definition");
        }
        Ok(tasks)
    }

    /// Reload every active, non-transient workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if workspaces cannot be listed.
    pub async fn sync_all(&self) -> Result<Vec<String>> {
        let mut synced = Vec::new();
        for workspace in self.workspaces.list_active().await? {
            if is_excluded_workspace(Path::new(&workspace.path), &self.transient_prefixes) {
                continue;
            }
            if let Err(err) = self.sync_workspace(&workspace.path).await {
                warn!(workspace = %workspace.path, %err, "failed to sync cron tasks");
                continue;
            }
            synced.push(workspace.path);
        }
        Ok(synced)
    }

    /// One scheduler pass at `now`: reload definitions and run due tasks
    /// concurrently.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if tasks cannot be listed.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<TaskRun>> {
        let workspaces = self.sync_all().await?;
        let mut due = Vec::new();
        for workspace in &workspaces {
            for task in self.cron.list(Some(workspace)).await? {
                if !task.enabled {
                    continue;
                }
                match task.parsed_schedule() {
                    Ok(schedule) if is_due(&schedule, now, task.last_run) => due.push(task),
                    Ok(_) => {}
                    Err(err) => warn!(task = %task.name, %err, "stored schedule is invalid"),
                }
            }
        }
        Ok(self.run_batch(due, now).await)
    }

    /// Run every enabled `@startup` task once.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if tasks cannot be listed.
    pub async fn run_startup_tasks(&self) -> Result<Vec<TaskRun>> {
        let workspaces = self.sync_all().await?;
        let mut startup = Vec::new();
        for workspace in &workspaces {
            for task in self.cron.list(Some(workspace)).await? {
                let is_startup = task.parsed_schedule().is_ok_and(|s| s.startup);
                if task.enabled && is_startup {
                    startup.push(task);
                }
            }
        }
        Ok(self.run_batch(startup, Utc::now()).await)
    }

    async fn run_batch(&self, tasks: Vec<CronTask>, now: DateTime<Utc>) -> Vec<TaskRun> {
        let runs = join_all(tasks.iter().map(|task| self.run_task_at(task, now))).await;
        runs.into_iter()
            .filter_map(|run| match run {
                Ok(run) => run,
                Err(err) => {
                    error!(%err, "cron task run failed");
                    None
                }
            })
            .collect()
    }

    /// Find a task by name, using `workspace` to disambiguate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no task matches, or
    /// `AppError::Validation` if the name exists in several workspaces and
    /// none was given.
    pub async fn resolve_task(&self, name: &str, workspace: Option<&str>) -> Result<CronTask> {
        if let Some(ws) = workspace {
            return self
                .cron
                .get(ws, name)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("cron task {name} not found")));
        }
        let mut matches = self.cron.find_by_name(name).await?;
        match matches.len() {
            0 => Err(AppError::NotFound(format!("cron task {name} not found"))),
            1 => Ok(matches.remove(0)),
            n => Err(AppError::Validation(format!(
                "cron task {name} exists in {n} workspaces; pass ?workspace="
            ))),
        }
    }

    /// Enable or disable a task.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve_task`].
    pub async fn set_enabled(
        &self,
        name: &str,
        workspace: Option<&str>,
        enabled: bool,
    ) -> Result<CronTask> {
        let task = self.resolve_task(name, workspace).await?;
        let task = self
            .cron
            .set_enabled(&task.workspace_path, &task.name, enabled)
            .await?;
        info!(task = %task.name, workspace = %task.workspace_path, enabled, "cron task toggled");
        Ok(task)
    }

    /// Run a task immediately, even if disabled.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve_task`]; `AppError::Conflict` if the task is
    /// already running.
    pub async fn run_task_now(&self, name: &str, workspace: Option<&str>) -> Result<TaskRun> {
        let task = self.resolve_task(name, workspace).await?;
        self.run_task_at(&task, Utc::now())
            .await?
            .ok_or_else(|| AppError::Conflict(format!("cron task {name} is already running")))
    }

    /// Execute, record, and deliver one run. Returns `None` when the same
    /// task is already running.
    async fn run_task_at(&self, task: &CronTask, now: DateTime<Utc>) -> Result<Option<TaskRun>> {
        let key = (task.workspace_path.clone(), task.name.clone());
        if !self.in_flight.lock().await.insert(key.clone()) {
            return Ok(None);
        }

        let span = info_span!("cron_run", task = %task.name, workspace = %task.workspace_path);
        let result = async {
            let ran_at = now.timestamp();
            let outcome = run_command(
                &task.command,
                Path::new(&task.workspace_path),
                Duration::from_secs(task.timeout_seconds),
            )
            .await;
            self.cron
                .record_run(
                    &task.workspace_path,
                    &task.name,
                    ran_at,
                    outcome.result,
                    &outcome.output,
                )
                .await?;
            let delivered = match task.target {
                Some(ref target) => self.deliver(task, target, &outcome).await,
                None => false,
            };
            info!(result = outcome.result.as_str(), delivered, "cron task finished");
            Ok(TaskRun {
                name: task.name.clone(),
                workspace_path: task.workspace_path.clone(),
                result: outcome.result,
                output: outcome.output,
                ran_at,
                delivered,
            })
        }
        .instrument(span)
        .await;

        self.in_flight.lock().await.remove(&key);
        result.map(Some)
    }

    async fn deliver(&self, task: &CronTask, target: &str, outcome: &RunOutcome) -> bool {
        let Some(session_id) = self.resolve_target(&task.workspace_path, target).await else {
            warn!(target, "cron target has no live session");
            return false;
        };
        let mut line = outcome.summary(&task.name);
        line.push('\n');
        match self.registry.send_input(&session_id, &line).await {
            Ok(()) => true,
            Err(err) => {
                warn!(target, %err, "failed to deliver cron summary");
                false
            }
        }
    }

    /// Live session addressed by `target` inside `workspace`.
    async fn resolve_target(&self, workspace: &str, target: &str) -> Option<String> {
        let live = self.registry.live_terminals(Some(workspace)).await;
        if target == ARCHITECT_TARGET {
            return live
                .into_iter()
                .find(|r| r.role == TerminalRole::Architect)
                .map(|r| r.id);
        }
        if let Some(record) = live
            .iter()
            .find(|r| r.role == TerminalRole::Builder && r.role_id.as_deref() == Some(target))
        {
            return Some(record.id.clone());
        }
        let builder = self.builders.get(workspace, target).await.ok().flatten()?;
        let terminal_id = builder.terminal_id?;
        live.into_iter().find(|r| r.id == terminal_id).map(|r| r.id)
    }
}

/// Spawn the scheduler loop. Startup tasks run first; clock-driven tasks
/// are checked every `interval`.
///
/// Each tick runs as its own task so a slow command never delays the next
/// tick. Cancellation aborts every tick still running, which kills its
/// commands.
#[must_use]
pub fn spawn_scheduler(
    scheduler: Arc<Scheduler>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => return,
            runs = scheduler.run_startup_tasks() => match runs {
                Ok(runs) => info!(count = runs.len(), "startup cron tasks finished"),
                Err(err) => error!(?err, "startup cron tasks failed"),
            },
        }

        let mut ticks: JoinSet<Result<Vec<TaskRun>>> = JoinSet::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(running = ticks.len(), "scheduler shutting down");
                    ticks.shutdown().await;
                    break;
                }
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&scheduler);
                    ticks.spawn(async move { scheduler.tick(Utc::now()).await });
                }
                Some(joined) = ticks.join_next() => match joined {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => error!(?err, "scheduler tick failed"),
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => error!(?err, "scheduler tick panicked"),
                },
            }
        }
    })
}
