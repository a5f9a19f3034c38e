#![forbid(unsafe_code)]

//! `agent-tower`: orchestrator binary.
//!
//! Loads configuration, opens the durable store, reconciles surviving
//! Shellper sessions, then runs the sweeper, the cron scheduler, and the
//! HTTP API until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_tower::http::{self, AppState};
use agent_tower::orchestrator::reconcile::reconcile;
use agent_tower::orchestrator::registry::TerminalRegistry;
use agent_tower::orchestrator::sweeper::spawn_sweeper;
use agent_tower::persistence::db;
use agent_tower::scheduler::{spawn_scheduler, Scheduler};
use agent_tower::{AppError, Result, TowerConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-tower", about = "Agent terminal orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-tower bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = TowerConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    let config = Arc::new(config);
    info!(port = config.http_port, socket_dir = %config.socket_dir.display(), "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);

    // ── Reconcile surviving sessions ────────────────────
    let registry = Arc::new(TerminalRegistry::new(Arc::clone(&db), &config)?);
    match reconcile(&registry, Arc::clone(&db), &config.transient_prefixes).await {
        Ok(report) => info!(
            readmitted = report.readmitted.len(),
            dropped_dead = report.dropped_dead.len(),
            orphan_sockets = report.orphan_sockets_removed.len(),
            "reconciliation complete"
        ),
        Err(err) => warn!(%err, "reconciliation failed; starting with an empty registry"),
    }

    // ── Background services ─────────────────────────────
    let ct = CancellationToken::new();
    let sweeper_handle = spawn_sweeper(
        Arc::clone(&registry),
        Arc::clone(&db),
        config.sweep_interval(),
        ct.clone(),
    );

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&db),
        Arc::clone(&registry),
        config.transient_prefixes.clone(),
    ));
    let scheduler_handle =
        spawn_scheduler(Arc::clone(&scheduler), config.scheduler_interval(), ct.clone());

    // ── HTTP API ────────────────────────────────────────
    let state = Arc::new(AppState::new(
        Arc::clone(&config),
        db,
        registry,
        scheduler,
    )?);
    let http_ct = ct.clone();
    let mut http_handle = tokio::spawn(http::serve(state, http_ct));

    // ── Wait for shutdown signal or listener failure ────
    let served = tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            None
        }
        joined = &mut http_handle => Some(joined),
    };
    ct.cancel();

    let served = match served {
        Some(joined) => joined,
        None => http_handle.await,
    };
    let _ = tokio::join!(sweeper_handle, scheduler_handle);

    // Shellpers keep running; the next start re-admits them.
    info!("agent-tower shut down");
    match served {
        Ok(result) => result,
        Err(err) => {
            error!(%err, "http task panicked");
            Err(AppError::Config(format!("http task failed: {err}")))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
