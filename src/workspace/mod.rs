//! Workspace validation, activation, and listing.

pub mod state;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::TowerConfig;
use crate::models::workspace::KnownWorkspace;
use crate::orchestrator::registry::TerminalRegistry;
use crate::persistence::workspace_repo::WorkspaceRepo;
use crate::{AppError, Result};

/// Validate a workspace path and return it symlink-resolved.
///
/// # Errors
///
/// Returns `AppError::Validation` if the path is relative, missing, not a
/// directory, or contains none of `markers`.
pub fn canonicalize_workspace(path: &str, markers: &[String]) -> Result<PathBuf> {
    let raw = Path::new(path);
    if !raw.is_absolute() {
        return Err(AppError::Validation(format!(
            "workspace path must be absolute: {path}"
        )));
    }
    let canonical = raw
        .canonicalize()
        .map_err(|err| AppError::Validation(format!("workspace {path} does not exist: {err}")))?;
    if !canonical.is_dir() {
        return Err(AppError::Validation(format!(
            "workspace {path} is not a directory"
        )));
    }
    let has_marker = markers
        .iter()
        .filter(|m| !m.trim().is_empty())
        .any(|marker| canonical.join(marker).exists());
    if !has_marker {
        return Err(AppError::Validation(format!(
            "workspace {path} has no project marker ({})",
            markers.join(", ")
        )));
    }
    Ok(canonical)
}

/// Whether `path` lies under one of the transient prefixes. Prefixes are
/// compared both as given and symlink-resolved.
#[must_use]
pub fn is_transient_path(path: &Path, prefixes: &[PathBuf]) -> bool {
    prefixes.iter().any(|prefix| {
        path.starts_with(prefix)
            || prefix
                .canonicalize()
                .is_ok_and(|resolved| path.starts_with(resolved))
    })
}

/// Whether a workspace should be ignored: missing from disk or transient.
#[must_use]
pub fn is_excluded_workspace(path: &Path, prefixes: &[PathBuf]) -> bool {
    !path.is_dir() || is_transient_path(path, prefixes)
}

/// Known workspaces, most recent first, without missing or transient paths.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn recent_workspaces(
    repo: &WorkspaceRepo,
    prefixes: &[PathBuf],
) -> Result<Vec<KnownWorkspace>> {
    Ok(repo
        .list_all()
        .await?
        .into_iter()
        .filter(|ws| !is_excluded_workspace(Path::new(&ws.path), prefixes))
        .collect())
}

/// Validate and activate a workspace, allocating its port block.
///
/// # Errors
///
/// Returns `AppError::Validation` for an invalid path, `AppError::Conflict`
/// when no port block is free, or `AppError::Db`.
pub async fn activate_workspace(
    repo: &WorkspaceRepo,
    config: &TowerConfig,
    path: &str,
) -> Result<KnownWorkspace> {
    let canonical = canonicalize_workspace(path, &config.project_markers)?;
    let workspace = repo
        .activate(
            &canonical.to_string_lossy(),
            config.port_range_start,
            config.port_block_size,
        )
        .await?;
    info!(workspace = %workspace.path, base_port = workspace.base_port, "workspace activated");
    Ok(workspace)
}

/// Delete the workspace's sessions and mark it inactive.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the workspace was never activated, or
/// `AppError::Db`.
pub async fn deactivate_workspace(
    repo: &WorkspaceRepo,
    registry: &TerminalRegistry,
    path: &str,
) -> Result<KnownWorkspace> {
    let resolved = resolve_known_path(repo, path).await?;
    let removed = registry.delete_workspace(&resolved).await?;
    let workspace = repo.deactivate(&resolved).await?;
    info!(workspace = %workspace.path, sessions = removed, "workspace deactivated");
    Ok(workspace)
}

/// Map a caller-supplied path to the stored form. Paths are stored
/// canonicalized; a directory that no longer exists is matched verbatim.
///
/// # Errors
///
/// Returns `AppError::NotFound` if neither form is known.
pub async fn resolve_known_path(repo: &WorkspaceRepo, path: &str) -> Result<String> {
    if repo.get(path).await?.is_some() {
        return Ok(path.to_owned());
    }
    if let Ok(canonical) = Path::new(path).canonicalize() {
        let canonical = canonical.to_string_lossy().into_owned();
        if repo.get(&canonical).await?.is_some() {
            return Ok(canonical);
        }
    }
    Err(AppError::NotFound(format!("workspace {path} not known")))
}

/// Look up a known workspace by caller-supplied path.
///
/// # Errors
///
/// Returns `AppError::NotFound` if it is unknown.
pub async fn find_workspace(repo: &WorkspaceRepo, path: &str) -> Result<KnownWorkspace> {
    let resolved = resolve_known_path(repo, path).await?;
    repo.get(&resolved)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("workspace {path} not known")))
}
