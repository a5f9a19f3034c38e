//! Periodic cleanup of dead sessions, orphan sockets, and expired nonces.
//!
//! Probes run concurrently against a snapshot of the registry, outside the
//! writer lock. Cancellation stops the loop; running Shellpers are never
//! touched on shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::liveness::probe_record;
use super::registry::{retire_orphan_socket, TerminalRegistry};
use crate::persistence::db::Database;
use crate::persistence::registration_repo::RegistrationRepo;
use crate::shellper::scan_socket_dir;
use crate::Result;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions probed.
    pub probed: usize,
    /// Sessions reaped as dead or undecidable.
    pub reaped: Vec<String>,
    /// Socket files owned by no session.
    pub orphan_sockets_removed: Vec<PathBuf>,
    /// Expired registration nonces removed.
    pub nonces_purged: u64,
}

/// Spawn the sweeper. The first sweep runs one `interval` after start.
#[must_use]
pub fn spawn_sweeper(
    registry: Arc<TerminalRegistry>,
    db: Arc<Database>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = sweep_once(&registry, &db).await {
                        error!(?err, "sweep failed");
                    }
                }
            }
        }
    })
}

/// Run one sweep.
///
/// # Errors
///
/// Returns `AppError::Db` if a durable row or the nonce table cannot be
/// updated. Reaping continues past individual failures.
pub async fn sweep_once(registry: &TerminalRegistry, db: &Arc<Database>) -> Result<SweepReport> {
    let snapshot = registry.list().await;
    let verdicts = join_all(snapshot.iter().map(|r| probe_record(registry.probe(), r))).await;

    let mut report = SweepReport {
        probed: snapshot.len(),
        ..SweepReport::default()
    };
    let mut first_error = None;

    for (record, liveness) in snapshot.iter().zip(verdicts) {
        if liveness.is_alive() {
            continue;
        }
        match registry.reap(&record.id, liveness).await {
            Ok(true) => report.reaped.push(record.id.clone()),
            Ok(false) => {}
            Err(err) => {
                warn!(id = %record.id, %err, "failed to reap session");
                first_error.get_or_insert(err);
            }
        }
    }

    let owned = registry.owned_sockets().await;
    for socket in scan_socket_dir(registry.socket_dir()) {
        if owned.contains(&socket) {
            continue;
        }
        // A create in progress binds its socket before it is registered.
        if is_recent(&socket, registry.orphan_grace()) {
            continue;
        }
        retire_orphan_socket(&socket, registry.ipc_timeout()).await;
        report.orphan_sockets_removed.push(socket);
    }

    report.nonces_purged = RegistrationRepo::new(Arc::clone(db))
        .purge_expired(Utc::now())
        .await?;

    if !report.reaped.is_empty() || !report.orphan_sockets_removed.is_empty() {
        info!(
            probed = report.probed,
            reaped = report.reaped.len(),
            orphan_sockets = report.orphan_sockets_removed.len(),
            nonces_purged = report.nonces_purged,
            "sweep complete"
        );
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(report),
    }
}

fn is_recent(path: &std::path::Path, grace: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age < grace)
}
