#![forbid(unsafe_code)]

//! `agent-tower-shellper`: detachable host for one persistent session.
//!
//! Started by `agent-tower`, never by hand in normal operation. Binds the
//! session socket, starts the child, prints a single readiness line on
//! stdout, then serves control requests until the child is gone.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agent_tower::shellper::server::{self, ShellperArgs};
use agent_tower::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "agent-tower-shellper",
    about = "Detachable process host for agent-tower sessions",
    version,
    long_about = None
)]
struct Cli {
    /// Session identifier.
    #[arg(long)]
    session_id: String,

    /// Socket path to serve on.
    #[arg(long)]
    socket: PathBuf,

    /// Working directory of the child.
    #[arg(long)]
    cwd: PathBuf,

    /// Tab label.
    #[arg(long, default_value = "")]
    label: String,

    /// Bytes of output retained for replay.
    #[arg(long, default_value_t = 64 * 1024)]
    scrollback_bytes: usize,

    /// File to write this process's log to.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Program to run followed by its arguments.
    #[arg(last = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;

    let mut command = cli.command.into_iter();
    let program = command
        .next()
        .ok_or_else(|| AppError::Validation("missing program to run".into()))?;

    let args = ShellperArgs {
        session_id: cli.session_id,
        socket_path: cli.socket,
        cwd: cli.cwd,
        label: cli.label,
        command: program,
        args: command.collect(),
        scrollback_bytes: cli.scrollback_bytes,
    };

    // Small runtime; one child and a handful of control connections.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Spawn(format!("failed to build tokio runtime: {err}")))?;

    match runtime.block_on(server::run(args)) {
        Ok(code) => {
            info!(?code, "shellper exiting");
            Ok(())
        }
        Err(err) => {
            error!(%err, "shellper failed");
            Err(err)
        }
    }
}

/// Log to the given file, or discard when none is set. Stdout carries the
/// readiness line and must stay clean.
fn init_tracing(log_file: Option<&PathBuf>) -> Result<()> {
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| AppError::Io(format!("cannot open log file {}: {err}", path.display())))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to initialize tracing: {err}")))
}
