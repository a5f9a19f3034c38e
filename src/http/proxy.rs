//! `/project/<encodedWorkspacePath>/...` reverse proxy handlers.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::response::Response;
use tracing::debug;

use super::SharedState;
use crate::persistence::workspace_repo::WorkspaceRepo;
use crate::proxy::{decode_valid_workspace, ProxyRoute};
use crate::workspace::find_workspace;
use crate::Result;

pub(super) async fn forward_root(
    State(state): State<SharedState>,
    Path(encoded): Path<String>,
    request: Request,
) -> Result<Response<Body>> {
    forward(&state, &encoded, "", request).await
}

pub(super) async fn forward_path(
    State(state): State<SharedState>,
    Path((encoded, rest)): Path<(String, String)>,
    request: Request,
) -> Result<Response<Body>> {
    forward(&state, &encoded, &rest, request).await
}

/// Resolve the workspace and port, then hand the request upstream.
async fn forward(
    state: &SharedState,
    encoded: &str,
    tail: &str,
    request: Request,
) -> Result<Response<Body>> {
    let path = decode_valid_workspace(encoded)?;
    let workspace = find_workspace(&WorkspaceRepo::new(Arc::clone(&state.db)), &path).await?;
    let route = ProxyRoute::parse(tail);
    let port = route.target_port(workspace.base_port);
    debug!(workspace = %workspace.path, role = ?route.role, port, "proxy route resolved");
    state.forwarder.forward(request, port, &route.rest).await
}
