//! `/api/cron/tasks` handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::SharedState;
use crate::models::cron::CronTask;
use crate::scheduler::TaskRun;
use crate::Result;

/// `?workspace=` filter and disambiguator.
#[derive(Debug, Default, Deserialize)]
pub struct WorkspaceQuery {
    /// Workspace path.
    pub workspace: Option<String>,
}

/// Reply of `GET /api/cron/tasks`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskList {
    /// Matching tasks.
    pub tasks: Vec<CronTask>,
}

pub(super) async fn list(
    State(state): State<SharedState>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<TaskList>> {
    let tasks = state
        .scheduler
        .repo()
        .list(query.workspace.as_deref())
        .await?;
    Ok(Json(TaskList { tasks }))
}

pub(super) async fn status(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<CronTask>> {
    let task = state
        .scheduler
        .resolve_task(&name, query.workspace.as_deref())
        .await?;
    Ok(Json(task))
}

pub(super) async fn run(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<TaskRun>> {
    let run = state
        .scheduler
        .run_task_now(&name, query.workspace.as_deref())
        .await?;
    Ok(Json(run))
}

pub(super) async fn enable(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<CronTask>> {
    toggle(&state, &name, query.workspace.as_deref(), true).await
}

pub(super) async fn disable(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<CronTask>> {
    toggle(&state, &name, query.workspace.as_deref(), false).await
}

async fn toggle(
    state: &SharedState,
    name: &str,
    workspace: Option<&str>,
    enabled: bool,
) -> Result<Json<CronTask>> {
    let task = state.scheduler.set_enabled(name, workspace, enabled).await?;
    Ok(Json(task))
}
