//! The Shellper process body: owns one child and serves the control socket.
//!
//! Runs inside the `agent-tower-shellper` binary. The orchestrator talks to
//! it only through [`super::client`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, info_span, warn, Instrument};

use super::protocol::{ReadyLine, ShellperRequest, ShellperResponse, ShellperStatus};
use crate::{AppError, Result};

/// Environment variable carrying the session id into the child.
pub const SESSION_ID_ENV: &str = "TOWER_SESSION_ID";

/// Everything a Shellper needs to start its child.
#[derive(Debug, Clone)]
pub struct ShellperArgs {
    /// Session served by this Shellper.
    pub session_id: String,
    /// Socket path to bind.
    pub socket_path: PathBuf,
    /// Working directory of the child.
    pub cwd: PathBuf,
    /// Tab label.
    pub label: String,
    /// Program to run.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Bytes of child output kept for `replay`.
    pub scrollback_bytes: usize,
}

/// Bounded tail of the child's combined output.
#[derive(Debug)]
pub struct Scrollback {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl Scrollback {
    /// Create an empty buffer retaining at most `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    /// Append bytes, dropping the oldest once full.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let tail = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (self.buf.len() + tail.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(tail);
    }

    /// Current contents as lossy UTF-8.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let (front, back) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(self.buf.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

struct Shared {
    status: ShellperStatus,
    running: AtomicBool,
    scrollback: Mutex<Scrollback>,
    stdin: Mutex<Option<ChildStdin>>,
    terminate: mpsc::Sender<()>,
}

/// Detach from the launching terminal session so signals aimed at the
/// orchestrator's session do not reach this process.
#[cfg(unix)]
fn detach_session() {
    if let Err(err) = nix::unistd::setsid() {
        // Fails when already a process group leader, e.g. run from a shell.
        warn!(%err, "setsid failed");
    }
}

#[cfg(not(unix))]
fn detach_session() {}

fn write_ready_line(line: &ReadyLine) -> Result<()> {
    use std::io::Write;

    let mut encoded = serde_json::to_string(line)
        .map_err(|err| AppError::Ipc(format!("failed to encode ready line: {err}")))?;
    encoded.push('\n');
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(encoded.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Run a Shellper until its child exits, a `terminate` command arrives, or
/// the process receives SIGTERM. Returns the child's exit code when known.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the socket cannot be bound, or
/// `AppError::Spawn` if the child cannot be started. Both are reported on
/// stdout as a failed [`ReadyLine`] first.
pub async fn run(args: ShellperArgs) -> Result<Option<i32>> {
    detach_session();

    if let Err(err) = std::fs::remove_file(&args.socket_path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(%err, "failed to remove stale socket");
        }
    }

    let listener = match bind(&args) {
        Ok(listener) => listener,
        Err(err) => {
            write_ready_line(&ReadyLine::failed(err.to_string()))?;
            return Err(err);
        }
    };

    let mut child = match Command::new(&args.command)
        .args(&args.args)
        .current_dir(&args.cwd)
        .env(SESSION_ID_ENV, &args.session_id)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            let err = AppError::Spawn(format!("failed to start '{}': {err}", args.command));
            drop(listener);
            super::remove_socket_file(&args.socket_path);
            write_ready_line(&ReadyLine::failed(err.to_string()))?;
            return Err(err);
        }
    };

    let pid = child
        .id()
        .ok_or_else(|| AppError::Spawn("child exited before reporting a pid".into()))?;
    let shellper_pid = std::process::id();

    let (terminate_tx, mut terminate_rx) = mpsc::channel(1);
    let shared = Arc::new(Shared {
        status: ShellperStatus {
            session_id: args.session_id.clone(),
            label: args.label.clone(),
            pid,
            shellper_pid,
            started_at: Utc::now(),
            running: true,
        },
        running: AtomicBool::new(true),
        scrollback: Mutex::new(Scrollback::new(args.scrollback_bytes)),
        stdin: Mutex::new(child.stdin.take()),
        terminate: terminate_tx,
    });

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_output(stdout, Arc::clone(&shared)));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_output(stderr, Arc::clone(&shared)));
    }

    write_ready_line(&ReadyLine::ready(pid, shellper_pid))?;
    info!(session_id = %args.session_id, pid, shellper_pid, "shellper serving");

    let mut signals = termination_signal()?;
    let exit_code = loop {
        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                info!(?code, "child exited");
                break code;
            }
            Some(()) = terminate_rx.recv() => {
                info!("terminate requested");
                break kill_child(&mut child).await;
            }
            () = recv_signal(&mut signals) => {
                info!("termination signal received");
                break kill_child(&mut child).await;
            }
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&shared)));
                }
                Err(err) => warn!(%err, "shellper accept failed"),
            },
        }
    };

    shared.running.store(false, Ordering::SeqCst);
    drop(listener);
    super::remove_socket_file(&args.socket_path);
    Ok(exit_code)
}

fn bind(args: &ShellperArgs) -> Result<interprocess::local_socket::tokio::Listener> {
    let name = args
        .socket_path
        .as_path()
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| {
            AppError::Ipc(format!(
                "invalid socket path '{}': {err}",
                args.socket_path.display()
            ))
        })?;
    ListenerOptions::new()
        .name(name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to bind shellper socket: {err}")))
}

async fn kill_child(child: &mut tokio::process::Child) -> Option<i32> {
    if let Err(err) = child.kill().await {
        warn!(%err, "failed to kill child");
    }
    child.wait().await.ok().and_then(|s| s.code())
}

/// SIGTERM and SIGINT listeners.
#[cfg(unix)]
struct TermSignal {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
fn termination_signal() -> Result<TermSignal> {
    use tokio::signal::unix::{signal, SignalKind};
    Ok(TermSignal {
        terminate: signal(SignalKind::terminate())?,
        interrupt: signal(SignalKind::interrupt())?,
    })
}

#[cfg(unix)]
async fn recv_signal(sig: &mut TermSignal) {
    let received = tokio::select! {
        r = sig.terminate.recv() => r,
        r = sig.interrupt.recv() => r,
    };
    if received.is_none() {
        std::future::pending::<()>().await;
    }
}

#[cfg(not(unix))]
type TermSignal = ();

#[cfg(not(unix))]
fn termination_signal() -> Result<TermSignal> {
    Ok(())
}

#[cfg(not(unix))]
async fn recv_signal(_sig: &mut TermSignal) {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn pump_output<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0_u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => shared.scrollback.lock().await.push(&chunk[..n]),
            Err(err) => {
                warn!(%err, "child output read failed");
                break;
            }
        }
    }
}

/// Handle a single control connection.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, shared: Arc<Shared>) {
    let span = info_span!("shellper_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let request = serde_json::from_str::<ShellperRequest>(trimmed);
                    let terminate = matches!(request, Ok(ShellperRequest::Terminate));
                    let response = match request {
                        Ok(request) => dispatch(request, &shared).await,
                        Err(err) => ShellperResponse::error(format!("invalid request: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write shellper response");
                        break;
                    }
                    if terminate {
                        // Reply first; the main loop exits right after.
                        let _ = shared.terminate.send(()).await;
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "shellper read error");
                    break;
                }
            }
        }
    }
    .instrument(span)
    .await;
}

async fn dispatch(request: ShellperRequest, shared: &Shared) -> ShellperResponse {
    match request {
        ShellperRequest::Status => {
            let status = ShellperStatus {
                running: shared.running.load(Ordering::SeqCst),
                ..shared.status.clone()
            };
            match serde_json::to_value(&status) {
                Ok(value) => ShellperResponse::success(value),
                Err(err) => ShellperResponse::error(format!("status encoding failed: {err}")),
            }
        }
        ShellperRequest::Input { data } => {
            let mut stdin = shared.stdin.lock().await;
            let Some(pipe) = stdin.as_mut() else {
                return ShellperResponse::error("stdin closed");
            };
            let written = async {
                pipe.write_all(data.as_bytes()).await?;
                pipe.flush().await
            }
            .await;
            match written {
                Ok(()) => ShellperResponse::success(serde_json::json!({ "bytes": data.len() })),
                Err(err) => {
                    *stdin = None;
                    ShellperResponse::error(format!("stdin write failed: {err}"))
                }
            }
        }
        ShellperRequest::Replay => {
            let output = shared.scrollback.lock().await.snapshot();
            ShellperResponse::success(serde_json::json!({ "output": output }))
        }
        ShellperRequest::Terminate => {
            ShellperResponse::success(serde_json::json!({ "terminating": true }))
        }
    }
}
