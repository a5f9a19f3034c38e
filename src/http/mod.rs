//! HTTP control API and reverse proxy.
//!
//! Binds `127.0.0.1` only. Every route passes through the loopback-origin
//! check and the body size limit.

pub mod cron;
pub mod error;
pub mod origin;
pub mod proxy;
pub mod registrations;
pub mod terminals;
pub mod workspaces;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::middleware;
use axum::routing::{any, delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::TowerConfig;
use crate::orchestrator::registry::TerminalRegistry;
use crate::persistence::db::Database;
use crate::proxy::ProxyForwarder;
use crate::scheduler::Scheduler;
use crate::{AppError, Result};

/// Upper bound on one proxied upstream exchange.
const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every handler.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<TowerConfig>,
    /// Durable store.
    pub db: Arc<Database>,
    /// Session registry.
    pub registry: Arc<TerminalRegistry>,
    /// Cron scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Reverse proxy client.
    pub forwarder: ProxyForwarder,
    /// Process start time.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Assemble state from its parts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the proxy client cannot be built.
    pub fn new(
        config: Arc<TowerConfig>,
        db: Arc<Database>,
        registry: Arc<TerminalRegistry>,
        scheduler: Arc<Scheduler>,
    ) -> Result<Self> {
        let forwarder = ProxyForwarder::new(config.max_body_bytes, PROXY_TIMEOUT)?;
        Ok(Self {
            config,
            db,
            registry,
            scheduler,
            forwarder,
            started_at: Utc::now(),
        })
    }
}

/// Handler state type.
pub type SharedState = Arc<AppState>;

/// `GET /health`.
async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    version: &'static str,
    started_at: DateTime<Utc>,
    uptime_seconds: i64,
    terminals: usize,
    live_terminals: usize,
    active_workspaces: usize,
}

/// `GET /api/status`.
async fn status(State(state): State<SharedState>) -> Result<Json<StatusResponse>> {
    let active = crate::persistence::workspace_repo::WorkspaceRepo::new(Arc::clone(&state.db))
        .list_active()
        .await?;
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        terminals: state.registry.list().await.len(),
        live_terminals: state.registry.live_terminals(None).await.len(),
        active_workspaces: active.len(),
    }))
}

/// Build the full router.
pub fn build_router(state: SharedState) -> Router {
    let max_body = state.config.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route(
            "/api/terminals",
            post(terminals::create).get(terminals::list),
        )
        .route(
            "/api/terminals/{id}",
            get(terminals::get_one).delete(terminals::remove),
        )
        .route("/api/terminals/{id}/input", post(terminals::input))
        .route("/api/projects", get(workspaces::projects))
        .route(
            "/api/workspaces/{encoded}/activate",
            post(workspaces::activate),
        )
        .route(
            "/api/workspaces/{encoded}/deactivate",
            post(workspaces::deactivate),
        )
        .route("/workspace/{encoded}/api/state", get(workspaces::state))
        .route(
            "/workspace/{encoded}/api/builders/{builder_id}",
            put(workspaces::upsert_builder).delete(workspaces::delete_builder),
        )
        .route("/workspace/{encoded}/api/tabs", post(workspaces::open_tab))
        .route(
            "/workspace/{encoded}/api/tabs/{tab_id}",
            delete(workspaces::close_tab),
        )
        .route("/api/cron/tasks", get(cron::list))
        .route("/api/cron/tasks/{name}/status", get(cron::status))
        .route("/api/cron/tasks/{name}/run", post(cron::run))
        .route("/api/cron/tasks/{name}/enable", post(cron::enable))
        .route("/api/cron/tasks/{name}/disable", post(cron::disable))
        .route("/api/registrations", post(registrations::create))
        .route(
            "/api/registrations/{nonce}/redeem",
            post(registrations::redeem),
        )
        .route("/project/{encoded}", any(proxy::forward_root))
        .route("/project/{encoded}/", any(proxy::forward_root))
        .route("/project/{encoded}/{*rest}", any(proxy::forward_path))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(middleware::from_fn(origin::require_loopback_origin))
        .with_state(state)
}

/// Serve the API on `127.0.0.1:<http_port>` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind or the server
/// fails.
pub async fn serve(state: SharedState, ct: CancellationToken) -> Result<()> {
    let bind = SocketAddr::from(([127, 0, 0, 1], state.config.http_port));
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind http on {bind}: {err}")))?;
    serve_on(listener, state, ct).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns `AppError::Config` if the server fails.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: SharedState,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Config(format!("listener has no address: {err}")))?;
    info!(%local, "http api listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("http server error: {err}")))?;

    info!("http api shut down");
    Ok(())
}
