//! Launches Shellper processes for persistent sessions.
//!
//! The Shellper is started without `kill_on_drop`, with stdin and stderr
//! detached, and with stdout piped only long enough to read its readiness
//! line. It calls `setsid` itself, so it outlives the orchestrator.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::protocol::ReadyLine;
use super::{log_path_for, socket_path_for};
use crate::config::TowerConfig;
use crate::{AppError, Result};

/// What to run inside a new Shellper.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    /// Session id, also used to name the socket.
    pub session_id: &'a str,
    /// Program to run.
    pub command: &'a str,
    /// Program arguments.
    pub args: &'a [String],
    /// Working directory.
    pub cwd: &'a Path,
    /// Tab label.
    pub label: &'a str,
}

/// A Shellper that reported readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedShellper {
    /// PID of the real child.
    pub pid: u32,
    /// PID of the Shellper.
    pub shellper_pid: u32,
    /// Socket the Shellper serves.
    pub socket_path: PathBuf,
}

/// Starts Shellpers from a fixed binary into a fixed socket directory.
#[derive(Debug, Clone)]
pub struct ShellperLauncher {
    bin: PathBuf,
    socket_dir: PathBuf,
    spawn_timeout: Duration,
    scrollback_bytes: usize,
}

impl ShellperLauncher {
    /// Create a launcher.
    #[must_use]
    pub fn new(
        bin: PathBuf,
        socket_dir: PathBuf,
        spawn_timeout: Duration,
        scrollback_bytes: usize,
    ) -> Self {
        Self {
            bin,
            socket_dir,
            spawn_timeout,
            scrollback_bytes,
        }
    }

    /// Build a launcher from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the Shellper binary cannot be resolved.
    pub fn from_config(config: &TowerConfig) -> Result<Self> {
        Ok(Self::new(
            config.shellper_bin()?,
            config.socket_dir.clone(),
            config.spawn_timeout(),
            config.scrollback_bytes,
        ))
    }

    /// Directory sockets are created in.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Start a Shellper and wait for its readiness line.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn` if the Shellper binary cannot be executed, it
    ///   exits before reporting, it reports a failed start, or the readiness
    ///   line does not arrive within the spawn timeout (the Shellper is
    ///   killed in that case).
    /// - `AppError::Io` if the socket directory cannot be created.
    pub async fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchedShellper> {
        std::fs::create_dir_all(&self.socket_dir)?;
        let socket_path = socket_path_for(&self.socket_dir, request.session_id);
        let log_path = log_path_for(&self.socket_dir, request.session_id);

        let mut cmd = Command::new(&self.bin);
        cmd.arg("--session-id")
            .arg(request.session_id)
            .arg("--socket")
            .arg(&socket_path)
            .arg("--cwd")
            .arg(request.cwd)
            .arg("--label")
            .arg(request.label)
            .arg("--scrollback-bytes")
            .arg(self.scrollback_bytes.to_string())
            .arg("--log-file")
            .arg(&log_path)
            .arg("--")
            .arg(request.command)
            .args(request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!(
                "failed to start shellper {}: {err}",
                self.bin.display()
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture shellper stdout".into()))?;
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        let outcome = match tokio::time::timeout(self.spawn_timeout, reader.read_line(&mut line))
            .await
        {
            Ok(Ok(n)) if n > 0 => parse_ready_line(&line),
            Ok(Ok(_)) => Err(AppError::Spawn(
                "shellper exited before reporting readiness".into(),
            )),
            Ok(Err(err)) => Err(AppError::Spawn(format!(
                "failed to read shellper ready line: {err}"
            ))),
            Err(_elapsed) => Err(AppError::Spawn(format!(
                "shellper did not report readiness within {:?}",
                self.spawn_timeout
            ))),
        };

        // A Shellper that failed readiness may still be running.
        if outcome.is_err() {
            child.kill().await.ok();
            super::remove_socket_file(&socket_path);
        }

        // Reap the Shellper whenever it exits so it never lingers as a zombie
        // under this process.
        tokio::spawn(async move {
            if let Err(err) = child.wait().await {
                warn!(%err, "failed to reap shellper");
            }
        });

        let (pid, shellper_pid) = outcome?;
        info!(
            session_id = request.session_id,
            pid,
            shellper_pid,
            socket = %socket_path.display(),
            "shellper ready"
        );
        Ok(LaunchedShellper {
            pid,
            shellper_pid,
            socket_path,
        })
    }
}

/// Parse the readiness line into `(child pid, shellper pid)`.
///
/// # Errors
///
/// Returns `AppError::Spawn` for malformed JSON, an `ok: false` report, or a
/// line missing either pid.
pub fn parse_ready_line(line: &str) -> Result<(u32, u32)> {
    let ready: ReadyLine = serde_json::from_str(line.trim())
        .map_err(|err| AppError::Spawn(format!("malformed shellper ready line: {err}")))?;
    match (ready.ok, ready.pid, ready.shellper_pid) {
        (true, Some(pid), Some(shellper_pid)) => Ok((pid, shellper_pid)),
        _ => Err(AppError::Spawn(ready.error.unwrap_or_else(|| {
            "shellper reported an incomplete ready line".into()
        }))),
    }
}
