//! In-memory session registry backed by the `terminal_session` table.
//!
//! Mutations (create, delete, reap, admit) serialize on one writer lock.
//! Readers take only the read side of the entry map, so a create that is
//! waiting on a Shellper never blocks them. Entries leave the map before
//! their backing process is torn down, so no reader sees a session once its
//! delete has returned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, info_span, warn, Instrument};

use super::liveness::{probe_record, Liveness, LivenessProbe, PidProbe, SessionProbe};
use super::spawner::{spawn_direct, DirectChild};
use crate::config::TowerConfig;
use crate::models::terminal::{new_terminal_id, CreateTerminalRequest, TerminalRecord};
use crate::persistence::db::Database;
use crate::persistence::terminal_repo::TerminalRepo;
use crate::persistence::workspace_repo::WorkspaceRepo;
use crate::shellper::client::{terminate_at, try_connect, ConnectOutcome, ShellperClient};
use crate::shellper::launcher::{LaunchRequest, ShellperLauncher};
use crate::shellper::{remove_socket_files, socket_path_for};
use crate::workspace::find_workspace;
use crate::{AppError, Result};

/// One registered session.
#[derive(Debug, Clone)]
pub struct TerminalEntry {
    /// Durable description.
    pub record: TerminalRecord,
    direct: Option<Arc<DirectChild>>,
}

/// The session registry.
pub struct TerminalRegistry {
    entries: RwLock<HashMap<String, TerminalEntry>>,
    writer: Mutex<()>,
    repo: TerminalRepo,
    workspaces: WorkspaceRepo,
    launcher: ShellperLauncher,
    probe: Arc<dyn LivenessProbe>,
    ipc_timeout: Duration,
    orphan_grace: Duration,
}

impl TerminalRegistry {
    /// Build a registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the Shellper binary cannot be resolved.
    pub fn new(db: Arc<Database>, config: &TowerConfig) -> Result<Self> {
        let launcher = ShellperLauncher::from_config(config)?;
        let probe = Arc::new(SessionProbe::new(config.probe_timeout()));
        Ok(Self::with_parts(db, launcher, probe, config.probe_timeout())
            .with_orphan_grace(config.orphan_grace()))
    }

    /// Build a registry from explicit parts.
    #[must_use]
    pub fn with_parts(
        db: Arc<Database>,
        launcher: ShellperLauncher,
        probe: Arc<dyn LivenessProbe>,
        ipc_timeout: Duration,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
            repo: TerminalRepo::new(Arc::clone(&db)),
            workspaces: WorkspaceRepo::new(db),
            launcher,
            probe,
            ipc_timeout,
            orphan_grace: Duration::from_secs(60),
        }
    }

    /// Set how long the sweeper leaves an unowned socket alone.
    #[must_use]
    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    /// Age below which an unowned socket may belong to a create in flight.
    #[must_use]
    pub fn orphan_grace(&self) -> Duration {
        self.orphan_grace
    }

    /// Probe used for every liveness decision.
    #[must_use]
    pub fn probe(&self) -> &dyn LivenessProbe {
        self.probe.as_ref()
    }

    /// Directory holding Shellper sockets.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        self.launcher.socket_dir()
    }

    /// Timeout applied to Shellper control requests.
    #[must_use]
    pub fn ipc_timeout(&self) -> Duration {
        self.ipc_timeout
    }

    /// Start a session and register it.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` for a malformed request, an inactive or
    ///   unknown workspace, or a missing working directory.
    /// - `AppError::Spawn` if the backing process cannot be started.
    /// - `AppError::Db` if the durable row cannot be written; the started
    ///   process is torn down in that case.
    pub async fn create(&self, request: CreateTerminalRequest) -> Result<TerminalRecord> {
        request.validate()?;

        let workspace_path = match request.workspace_path {
            Some(ref workspace) => match find_workspace(&self.workspaces, workspace).await {
                Ok(ws) if ws.active => Some(ws.path),
                Ok(_) | Err(AppError::NotFound(_)) => {
                    return Err(AppError::Validation(format!(
                        "workspace {workspace} is not active"
                    )))
                }
                Err(err) => return Err(err),
            },
            None => None,
        };

        let cwd = request
            .cwd
            .clone()
            .or_else(|| workspace_path.clone())
            .ok_or_else(|| AppError::Validation("cwd or workspacePath is required".into()))?;
        if !Path::new(&cwd).is_dir() {
            return Err(AppError::Validation(format!("cwd {cwd} is not a directory")));
        }
        let label = request
            .label
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| request.command.clone());

        let _writer = self.writer.lock().await;
        let id = new_terminal_id();
        let span = info_span!("terminal_create", id = %id, persistent = request.persistent);

        async {
            let mut record = TerminalRecord {
                id: id.clone(),
                command: request.command.clone(),
                args: request.args.clone(),
                cwd: cwd.clone(),
                label: label.clone(),
                role: request.role,
                role_id: request.role_id.clone(),
                workspace_path: workspace_path.clone(),
                pid: 0,
                persistent: request.persistent,
                socket_path: None,
                shellper_pid: None,
                created_at: Utc::now(),
            };

            let direct = if request.persistent {
                let launched = self
                    .launcher
                    .launch(&LaunchRequest {
                        session_id: &id,
                        command: &request.command,
                        args: &request.args,
                        cwd: Path::new(&cwd),
                        label: &label,
                    })
                    .await?;
                record.pid = launched.pid;
                record.shellper_pid = Some(launched.shellper_pid);
                record.socket_path = Some(launched.socket_path.to_string_lossy().into_owned());
                None
            } else {
                let child = spawn_direct(&id, &request.command, &request.args, Path::new(&cwd))?;
                record.pid = child.pid();
                Some(Arc::new(child))
            };

            let entry = TerminalEntry {
                record: record.clone(),
                direct,
            };

            if let Err(err) = self.repo.insert(&record).await {
                warn!(%err, "failed to persist session; tearing down");
                self.teardown(&entry).await;
                return Err(err);
            }

            self.entries.write().await.insert(id.clone(), entry);
            info!(pid = record.pid, "session created");
            Ok(record)
        }
        .instrument(span)
        .await
    }

    /// Registered record, without probing.
    pub async fn get(&self, id: &str) -> Option<TerminalRecord> {
        self.entries.read().await.get(id).map(|e| e.record.clone())
    }

    /// Registered record if its backing process is alive right now.
    pub async fn get_live(&self, id: &str) -> Option<TerminalRecord> {
        let record = self.get(id).await?;
        probe_record(self.probe(), &record)
            .await
            .is_alive()
            .then_some(record)
    }

    /// Every registered record, oldest first, without probing.
    pub async fn list(&self) -> Vec<TerminalRecord> {
        let mut records: Vec<TerminalRecord> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Records of one workspace, without probing.
    pub async fn list_for_workspace(&self, workspace: &str) -> Vec<TerminalRecord> {
        self.list()
            .await
            .into_iter()
            .filter(|r| r.in_workspace(workspace))
            .collect()
    }

    /// Records whose backing process is alive, optionally limited to one
    /// workspace. Probes run concurrently and outside every lock.
    pub async fn live_terminals(&self, workspace: Option<&str>) -> Vec<TerminalRecord> {
        let candidates: Vec<TerminalRecord> = match workspace {
            Some(ws) => self.list_for_workspace(ws).await,
            None => self.list().await,
        };
        let verdicts = join_all(candidates.iter().map(|r| probe_record(self.probe(), r))).await;
        candidates
            .into_iter()
            .zip(verdicts)
            .filter_map(|(record, liveness)| liveness.is_alive().then_some(record))
            .collect()
    }

    /// Write text to a session's stdin.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or the transport
    /// error of the backing process.
    pub async fn send_input(&self, id: &str, data: &str) -> Result<()> {
        let entry = self
            .entries
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("terminal {id} not found")))?;

        if let Some(direct) = entry.direct {
            return direct.send_input(data).await;
        }
        let socket = entry
            .record
            .socket()
            .ok_or_else(|| AppError::Ipc(format!("terminal {id} has no control socket")))?;
        ShellperClient::connect(socket, self.ipc_timeout)
            .await?
            .send_input(data)
            .await
    }

    /// Delete a session: registry entry, backing process, socket and log
    /// files, and durable row. Deleting an unknown or already deleted id
    /// succeeds. Returns whether anything was found.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the durable row cannot be read or removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let removed = self.entries.write().await.remove(id);
        let entry = match removed {
            Some(entry) => Some(entry),
            None => self.repo.get(id).await?.map(|record| TerminalEntry {
                record,
                direct: None,
            }),
        };

        let found = entry.is_some();
        if let Some(ref entry) = entry {
            self.teardown(entry).await;
        }
        remove_socket_files(&socket_path_for(self.socket_dir(), id));
        let rows = self.repo.delete(id).await?;
        info!(id, found, "session deleted");
        Ok(found || rows > 0)
    }

    /// Delete every session of a workspace. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a durable row cannot be removed.
    pub async fn delete_workspace(&self, workspace: &str) -> Result<usize> {
        let records = self.list_for_workspace(workspace).await;
        for record in &records {
            self.delete(&record.id).await?;
        }
        Ok(records.len())
    }

    /// Register a record whose backing process survived a restart. The
    /// durable row must already carry `record.id`.
    pub async fn admit(&self, record: TerminalRecord) {
        let _writer = self.writer.lock().await;
        info!(id = %record.id, pid = record.pid, "session re-admitted");
        self.entries.write().await.insert(
            record.id.clone(),
            TerminalEntry {
                record,
                direct: None,
            },
        );
    }

    /// Remove a session the sweeper found not alive. Skips ids that were
    /// deleted or replaced since the probe.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the durable row cannot be removed.
    pub async fn reap(&self, id: &str, liveness: Liveness) -> Result<bool> {
        let _writer = self.writer.lock().await;
        let Some(entry) = self.entries.write().await.remove(id) else {
            return Ok(false);
        };
        info!(id, ?liveness, "reaping session");
        self.teardown(&entry).await;
        remove_socket_files(&socket_path_for(self.socket_dir(), id));
        self.repo.delete(id).await?;
        Ok(true)
    }

    /// Socket paths currently owned by registered sessions.
    pub async fn owned_sockets(&self) -> Vec<PathBuf> {
        self.entries
            .read()
            .await
            .values()
            .filter_map(|e| e.record.socket().map(Path::to_path_buf))
            .collect()
    }

    /// Stop the backing process of `entry` and remove its files.
    async fn teardown(&self, entry: &TerminalEntry) {
        if let Some(ref direct) = entry.direct {
            direct.kill().await;
            return;
        }
        let Some(socket) = entry.record.socket() else {
            return;
        };
        terminate_shellper(socket, entry.record.shellper_pid, self.ipc_timeout).await;
        remove_socket_files(socket);
    }
}

/// Ask a Shellper to exit over its socket; fall back to SIGTERM when the
/// socket does not answer but the process still exists.
pub async fn terminate_shellper(socket: &Path, shellper_pid: Option<u32>, timeout: Duration) {
    match terminate_at(socket, timeout).await {
        Ok(()) => {}
        Err(err) => {
            let Some(pid) = shellper_pid else {
                return;
            };
            if PidProbe::check(pid) == Liveness::Alive {
                warn!(pid, %err, "shellper did not accept terminate; signalling");
                signal_terminate(pid);
            }
        }
    }
}

/// Remove a socket no session owns. A Shellper still listening on it is
/// told to terminate first so its child does not outlive the socket.
pub async fn retire_orphan_socket(socket: &Path, timeout: Duration) {
    if let ConnectOutcome::Connected(stream) = try_connect(socket, timeout).await {
        drop(stream);
        info!(socket = %socket.display(), "terminating orphan shellper");
        terminate_shellper(socket, None, timeout).await;
    }
    remove_socket_files(socket);
}

#[cfg(unix)]
fn signal_terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if raw <= 0 {
        return;
    }
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        warn!(pid, %err, "failed to signal shellper");
    }
}

#[cfg(not(unix))]
fn signal_terminate(pid: u32) {
    warn!(pid, "cannot signal shellper on this platform");
}
