//! Startup reconciliation of durable session rows against surviving
//! Shellpers.
//!
//! Runs once, before the HTTP listener binds. Surviving sessions are
//! re-admitted under a fresh id; everything else is dropped along with its
//! socket and log files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use super::liveness::{probe_record, Liveness};
use super::registry::{retire_orphan_socket, terminate_shellper, TerminalRegistry};
use crate::models::terminal::{new_terminal_id, TerminalRecord};
use crate::persistence::db::Database;
use crate::persistence::terminal_repo::TerminalRepo;
use crate::shellper::{remove_socket_files, scan_socket_dir, socket_path_for};
use crate::workspace::is_excluded_workspace;
use crate::Result;

/// What reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// `(old id, new id)` of every re-admitted session.
    pub readmitted: Vec<(String, String)>,
    /// Rows dropped because the backing process was gone or undecidable.
    pub dropped_dead: Vec<String>,
    /// Non-persistent rows, which cannot survive a restart.
    pub dropped_non_persistent: Vec<String>,
    /// Rows whose workspace is missing or transient.
    pub dropped_excluded: Vec<String>,
    /// Socket files with no surviving session.
    pub orphan_sockets_removed: Vec<PathBuf>,
}

/// Reconcile durable state with the socket directory and register
/// survivors in `registry`.
///
/// # Errors
///
/// Returns `AppError::Db` if the durable rows cannot be read. Per-record
/// failures are logged and the record is treated as dead.
pub async fn reconcile(
    registry: &TerminalRegistry,
    db: Arc<Database>,
    transient_prefixes: &[PathBuf],
) -> Result<ReconcileReport> {
    let span = info_span!("reconcile", socket_dir = %registry.socket_dir().display());
    async move {
        let repo = TerminalRepo::new(db);
        let records = repo.list_all().await?;
        let sockets = scan_socket_dir(registry.socket_dir());
        let mut report = ReconcileReport::default();

        let mut candidates: Vec<TerminalRecord> = Vec::new();
        for record in records {
            if !record.persistent {
                drop_record(&repo, registry, &record).await;
                report.dropped_non_persistent.push(record.id);
            } else if record
                .workspace_path
                .as_deref()
                .is_some_and(|ws| is_excluded_workspace(Path::new(ws), transient_prefixes))
            {
                if let Some(socket) = record.socket() {
                    terminate_shellper(socket, record.shellper_pid, registry.ipc_timeout()).await;
                }
                drop_record(&repo, registry, &record).await;
                report.dropped_excluded.push(record.id);
            } else {
                candidates.push(record);
            }
        }

        let verdicts =
            join_all(candidates.iter().map(|r| probe_record(registry.probe(), r))).await;

        let mut kept: HashSet<PathBuf> = HashSet::new();
        for (record, liveness) in candidates.into_iter().zip(verdicts) {
            if liveness != Liveness::Alive {
                info!(id = %record.id, ?liveness, "dropping session with no live shellper");
                if liveness == Liveness::Indeterminate {
                    if let Some(socket) = record.socket() {
                        terminate_shellper(socket, record.shellper_pid, registry.ipc_timeout())
                            .await;
                    }
                }
                drop_record(&repo, registry, &record).await;
                report.dropped_dead.push(record.id);
                continue;
            }

            let new_id = new_terminal_id();
            if let Err(err) = repo.reassign_id(&record.id, &new_id).await {
                warn!(id = %record.id, %err, "failed to re-key session; dropping");
                drop_record(&repo, registry, &record).await;
                report.dropped_dead.push(record.id);
                continue;
            }
            if let Some(socket) = record.socket() {
                kept.insert(socket.to_path_buf());
            }
            let old_id = record.id.clone();
            registry
                .admit(TerminalRecord {
                    id: new_id.clone(),
                    ..record
                })
                .await;
            report.readmitted.push((old_id, new_id));
        }

        for socket in sockets {
            // Sockets of dropped rows are already gone.
            if kept.contains(&socket) || !socket.exists() {
                continue;
            }
            retire_orphan_socket(&socket, registry.ipc_timeout()).await;
            report.orphan_sockets_removed.push(socket);
        }

        info!(
            readmitted = report.readmitted.len(),
            dropped_dead = report.dropped_dead.len(),
            dropped_non_persistent = report.dropped_non_persistent.len(),
            dropped_excluded = report.dropped_excluded.len(),
            orphan_sockets = report.orphan_sockets_removed.len(),
            "reconciliation complete"
        );
        Ok(report)
    }
    .instrument(span)
    .await
}

async fn drop_record(repo: &TerminalRepo, registry: &TerminalRegistry, record: &TerminalRecord) {
    if let Some(socket) = record.socket() {
        remove_socket_files(socket);
    }
    remove_socket_files(&socket_path_for(registry.socket_dir(), &record.id));
    if let Err(err) = repo.delete(&record.id).await {
        warn!(id = %record.id, %err, "failed to delete session row");
    }
}
