//! Single-use registration nonces.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::error::ApiJson;
use super::SharedState;
use crate::models::registration::PendingRegistration;
use crate::persistence::registration_repo::RegistrationRepo;
use crate::{AppError, Result};

/// Body of `POST /api/registrations`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistrationRequest {
    /// Device name.
    pub name: String,
    /// Server the device registers with.
    pub server_url: String,
}

pub(super) async fn create(
    State(state): State<SharedState>,
    ApiJson(request): ApiJson<CreateRegistrationRequest>,
) -> Result<(StatusCode, Json<PendingRegistration>)> {
    if request.name.trim().is_empty() || request.server_url.trim().is_empty() {
        return Err(AppError::Validation(
            "name and serverUrl are required".into(),
        ));
    }
    let registration = RegistrationRepo::new(Arc::clone(&state.db))
        .create(&request.name, &request.server_url)
        .await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub(super) async fn redeem(
    State(state): State<SharedState>,
    Path(nonce): Path<String>,
) -> Result<Json<PendingRegistration>> {
    let registration = RegistrationRepo::new(Arc::clone(&state.db))
        .consume(&nonce, Utc::now())
        .await?;
    Ok(Json(registration))
}
