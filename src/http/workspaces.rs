//! Workspace, builder, and file tab handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiJson;
use super::SharedState;
use crate::models::builder::{Builder, UpsertBuilderRequest};
use crate::models::file_tab::FileTab;
use crate::models::terminal::TerminalRole;
use crate::models::workspace::KnownWorkspace;
use crate::persistence::builder_repo::BuilderRepo;
use crate::persistence::file_tab_repo::FileTabRepo;
use crate::persistence::workspace_repo::WorkspaceRepo;
use crate::proxy::{decode_valid_workspace, encode_workspace_path};
use crate::workspace::state::{workspace_state, WorkspaceState};
use crate::workspace::{
    activate_workspace, deactivate_workspace, find_workspace, recent_workspaces,
};
use crate::{AppError, Result};

/// A known workspace with its URL segment.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    /// Stored workspace.
    #[serde(flatten)]
    pub workspace: KnownWorkspace,
    /// `encode_workspace_path(path)`.
    pub encoded_path: String,
}

impl From<KnownWorkspace> for ProjectView {
    fn from(workspace: KnownWorkspace) -> Self {
        Self {
            encoded_path: encode_workspace_path(&workspace.path),
            workspace,
        }
    }
}

/// Reply of `GET /api/projects`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectList {
    /// Most recently activated first.
    pub projects: Vec<ProjectView>,
}

/// Body of `POST /workspace/:encodedPath/api/tabs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenTabRequest {
    /// Absolute path of the file to annotate.
    pub file_path: String,
}

fn workspaces(state: &SharedState) -> WorkspaceRepo {
    WorkspaceRepo::new(Arc::clone(&state.db))
}

/// Decode the path segment and look the workspace up.
async fn known(state: &SharedState, encoded: &str) -> Result<KnownWorkspace> {
    let path = decode_valid_workspace(encoded)?;
    find_workspace(&workspaces(state), &path).await
}

pub(super) async fn projects(State(state): State<SharedState>) -> Result<Json<ProjectList>> {
    let listed = recent_workspaces(&workspaces(&state), &state.config.transient_prefixes).await?;
    Ok(Json(ProjectList {
        projects: listed.into_iter().map(ProjectView::from).collect(),
    }))
}

pub(super) async fn activate(
    State(state): State<SharedState>,
    Path(encoded): Path<String>,
) -> Result<Json<ProjectView>> {
    let path = decode_valid_workspace(&encoded)?;
    let workspace = activate_workspace(&workspaces(&state), &state.config, &path).await?;
    state.scheduler.sync_workspace(&workspace.path).await?;
    Ok(Json(workspace.into()))
}

pub(super) async fn deactivate(
    State(state): State<SharedState>,
    Path(encoded): Path<String>,
) -> Result<Json<ProjectView>> {
    let path = decode_valid_workspace(&encoded)?;
    let workspace = deactivate_workspace(&workspaces(&state), &state.registry, &path).await?;
    Ok(Json(workspace.into()))
}

pub(super) async fn state(
    State(state): State<SharedState>,
    Path(encoded): Path<String>,
) -> Result<Json<WorkspaceState>> {
    let workspace = known(&state, &encoded).await?;
    let view = workspace_state(&state.registry, &state.db, &workspace.path).await?;
    Ok(Json(view))
}

pub(super) async fn upsert_builder(
    State(state): State<SharedState>,
    Path((encoded, builder_id)): Path<(String, String)>,
    ApiJson(request): ApiJson<UpsertBuilderRequest>,
) -> Result<Json<Builder>> {
    if builder_id.trim().is_empty() {
        return Err(AppError::Validation("builder id must not be empty".into()));
    }
    if request.worktree.trim().is_empty() {
        return Err(AppError::Validation("worktree must not be empty".into()));
    }
    let workspace = known(&state, &encoded).await?;
    let builder = request.into_builder(builder_id, workspace.path);
    BuilderRepo::new(Arc::clone(&state.db)).upsert(&builder).await?;
    Ok(Json(builder))
}

/// Tear a builder down: its sessions, its row, and the tabs under its
/// worktree. Unknown builders still get their stray sessions removed.
pub(super) async fn delete_builder(
    State(state): State<SharedState>,
    Path((encoded, builder_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let workspace = known(&state, &encoded).await?;
    let builders = BuilderRepo::new(Arc::clone(&state.db));
    let builder = builders.get(&workspace.path, &builder_id).await?;

    let mut sessions: BTreeSet<String> = state
        .registry
        .list_for_workspace(&workspace.path)
        .await
        .into_iter()
        .filter(|r| {
            r.role == TerminalRole::Builder && r.role_id.as_deref() == Some(builder_id.as_str())
        })
        .map(|r| r.id)
        .collect();
    if let Some(terminal_id) = builder.as_ref().and_then(|b| b.terminal_id.clone()) {
        sessions.insert(terminal_id);
    }
    for id in &sessions {
        state.registry.delete(id).await?;
    }

    let mut tabs_removed = 0;
    if let Some(ref builder) = builder {
        tabs_removed = FileTabRepo::new(Arc::clone(&state.db))
            .delete_by_path_prefix(&builder.worktree)
            .await?;
        builders.delete(&workspace.path, &builder_id).await?;
    }

    info!(
        workspace = %workspace.path,
        builder = %builder_id,
        sessions = sessions.len(),
        tabs_removed,
        "builder torn down"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn open_tab(
    State(state): State<SharedState>,
    Path(encoded): Path<String>,
    ApiJson(request): ApiJson<OpenTabRequest>,
) -> Result<(StatusCode, Json<FileTab>)> {
    if !std::path::Path::new(&request.file_path).is_absolute() {
        return Err(AppError::Validation(format!(
            "filePath must be absolute: {}",
            request.file_path
        )));
    }
    let workspace = known(&state, &encoded).await?;
    let tab = FileTabRepo::new(Arc::clone(&state.db))
        .insert(&FileTab::new(workspace.path, request.file_path))
        .await?;
    Ok((StatusCode::CREATED, Json(tab)))
}

pub(super) async fn close_tab(
    State(state): State<SharedState>,
    Path((encoded, tab_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let workspace = known(&state, &encoded).await?;
    let removed = FileTabRepo::new(Arc::clone(&state.db))
        .delete(&workspace.path, &tab_id)
        .await?;
    if removed == 0 {
        return Err(AppError::NotFound(format!("tab {tab_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
