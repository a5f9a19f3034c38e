//! Liveness-filtered workspace view served at `/workspace/{enc}/api/state`.
//!
//! Nothing here is cached: every candidate session is probed on each read,
//! so a session that died since the last sweep is still left out.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;

use crate::models::builder::Builder;
use crate::models::file_tab::FileTab;
use crate::models::terminal::{TerminalRecord, TerminalRole};
use crate::orchestrator::liveness::probe_record;
use crate::orchestrator::registry::TerminalRegistry;
use crate::persistence::builder_repo::BuilderRepo;
use crate::persistence::db::Database;
use crate::persistence::file_tab_repo::FileTabRepo;
use crate::Result;

/// A builder joined with its live terminal.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuilderView {
    /// Durable builder metadata.
    #[serde(flatten)]
    pub builder: Builder,
    /// The backing session.
    pub terminal: TerminalRecord,
}

/// Externally visible state of a workspace.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    /// Live architect session, if any.
    pub architect: Option<TerminalRecord>,
    /// Builders whose session is alive.
    pub builders: Vec<BuilderView>,
    /// Live utility shells.
    pub utils: Vec<TerminalRecord>,
    /// Open file tabs.
    pub annotations: Vec<FileTab>,
}

/// Build the state of `workspace`.
///
/// # Errors
///
/// Returns `AppError::Db` if builders or file tabs cannot be read.
pub async fn workspace_state(
    registry: &TerminalRegistry,
    db: &Arc<Database>,
    workspace: &str,
) -> Result<WorkspaceState> {
    let builders = BuilderRepo::new(Arc::clone(db))
        .list_for_workspace(workspace)
        .await?;
    let annotations = FileTabRepo::new(Arc::clone(db))
        .list_for_workspace(workspace)
        .await?;

    let candidates = registry.list_for_workspace(workspace).await;
    let verdicts = join_all(candidates.iter().map(|r| probe_record(registry.probe(), r))).await;
    let live: Vec<TerminalRecord> = candidates
        .into_iter()
        .zip(verdicts)
        .filter_map(|(record, liveness)| liveness.is_alive().then_some(record))
        .collect();

    Ok(assemble(live, builders, annotations))
}

/// Join live sessions with builder rows. Builders without a live session
/// are omitted; the newest live architect wins.
#[must_use]
pub fn assemble(
    live: Vec<TerminalRecord>,
    builders: Vec<Builder>,
    annotations: Vec<FileTab>,
) -> WorkspaceState {
    let mut by_id: HashMap<String, TerminalRecord> =
        live.iter().map(|r| (r.id.clone(), r.clone())).collect();

    let builders: Vec<BuilderView> = builders
        .into_iter()
        .filter_map(|builder| {
            let terminal = by_id.remove(builder.terminal_id.as_deref()?)?;
            Some(BuilderView { builder, terminal })
        })
        .collect();

    let architect = live
        .iter()
        .filter(|r| r.role == TerminalRole::Architect)
        .max_by(|a, b| a.created_at.cmp(&b.created_at))
        .cloned();

    let utils = live
        .into_iter()
        .filter(|r| r.role == TerminalRole::Shell)
        .collect();

    WorkspaceState {
        architect,
        builders,
        utils,
        annotations,
    }
}
