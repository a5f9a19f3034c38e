//! Direct child spawner for non-persistent sessions.
//!
//! The child is owned by a monitor task that holds the only `Child` handle
//! and reaps it on exit, so a PID probe never sees a zombie. Non-persistent
//! sessions are bound to this process: `kill_on_drop(true)` is set.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};

use crate::shellper::server::SESSION_ID_ENV;
use crate::{AppError, Result};

/// Handle to a running direct child.
#[derive(Debug)]
pub struct DirectChild {
    pid: u32,
    stdin: Mutex<Option<ChildStdin>>,
    kill_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    monitor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DirectChild {
    /// PID of the child.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Write to the child's stdin.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if stdin is closed or the write fails.
    pub async fn send_input(&self, data: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return Err(AppError::Io("session stdin is closed".into()));
        };
        let written = async {
            pipe.write_all(data.as_bytes()).await?;
            pipe.flush().await
        }
        .await;
        if let Err(err) = written {
            *stdin = None;
            return Err(AppError::Io(format!("stdin write failed: {err}")));
        }
        Ok(())
    }

    /// Kill the child and wait until the monitor has reaped it. Safe to
    /// call more than once.
    pub async fn kill(&self) {
        let kill_tx = self
            .kill_tx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(tx) = kill_tx {
            // The monitor may already have seen the exit.
            let _ = tx.send(());
        }
        let monitor = self.monitor.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = monitor {
            if let Err(err) = handle.await {
                warn!(pid = self.pid, %err, "direct child monitor panicked");
            }
        }
    }
}

/// Start `command` in `cwd` and hand it to a monitor task.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the process cannot be started.
pub fn spawn_direct(
    session_id: &str,
    command: &str,
    args: &[String],
    cwd: &Path,
) -> Result<DirectChild> {
    let mut child = Command::new(command)
        .args(args)
        .current_dir(cwd)
        .env(SESSION_ID_ENV, session_id)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to start '{command}': {err}")))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Spawn("child exited before reporting a pid".into()))?;
    let stdin = child.stdin.take();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();

    let span = info_span!("direct_child", session_id, pid);
    let monitor = tokio::spawn(
        async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => info!(code = ?status.code(), "session process exited"),
                    Err(err) => warn!(%err, "failed to wait on session process"),
                },
                Ok(()) = kill_rx => {
                    if let Err(err) = child.kill().await {
                        warn!(%err, "failed to kill session process");
                    }
                    info!("session process killed");
                }
            }
        }
        .instrument(span),
    );

    Ok(DirectChild {
        pid,
        stdin: Mutex::new(stdin),
        kill_tx: std::sync::Mutex::new(Some(kill_tx)),
        monitor: std::sync::Mutex::new(Some(monitor)),
    })
}
