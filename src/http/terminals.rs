//! `/api/terminals` handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::ApiJson;
use super::SharedState;
use crate::models::terminal::{CreateTerminalRequest, TerminalRecord};
use crate::{AppError, Result};

/// Reply to a successful create.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTerminal {
    /// Session id.
    pub id: String,
    /// Agent process id.
    pub pid: u32,
    /// Whether the session is Shellper-backed.
    pub persistent: bool,
}

/// Session listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct TerminalList {
    /// Live sessions.
    pub terminals: Vec<TerminalRecord>,
}

/// Body of `POST /api/terminals/:id/input`.
#[derive(Debug, Deserialize)]
pub struct InputRequest {
    /// Bytes to write, as UTF-8.
    pub data: String,
}

pub(super) async fn create(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<CreateTerminalRequest>,
) -> Result<(StatusCode, Json<CreatedTerminal>)> {
    let record = state.registry.create(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedTerminal {
            id: record.id,
            pid: record.pid,
            persistent: record.persistent,
        }),
    ))
}

pub(super) async fn list(State(state): State<SharedState>) -> Json<TerminalList> {
    Json(TerminalList {
        terminals: state.registry.live_terminals(None).await,
    })
}

pub(super) async fn get_one(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<TerminalRecord>> {
    state
        .registry
        .get_live(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("terminal {id} not found")))
}

pub(super) async fn remove(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn input(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<InputRequest>,
) -> Result<StatusCode> {
    state.registry.send_input(&id, &body.data).await?;
    Ok(StatusCode::NO_CONTENT)
}
