//! Control-plane HTTP handlers.

use crate::registry::{RegistryError, StartParams};
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mandy_types::{ControlPayload, RoomKey, RoomKeyError, StatePayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Request body for `POST /start`.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub domain: Option<String>,
    pub room: String,
    #[serde(default)]
    pub room_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub directive: Option<String>,
}

/// Request body for `POST /control`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub domain: String,
    pub room: String,
    pub action: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub directive: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
}

impl ControlRequest {
    fn into_parts(self) -> (RoomKey, ControlPayload) {
        let key = RoomKey::new(self.domain, self.room);
        let payload = ControlPayload {
            action: self.action,
            requested_by: self.requested_by,
            mode: self.mode,
            directive: self.directive,
            reason: self.reason,
            version: self.version,
        };
        (key, payload)
    }
}

/// Query parameters for `GET /state`.
#[derive(Debug, Deserialize)]
pub struct StateQuery {
    pub domain: String,
    pub room: String,
}

/// Response body shared by every state-returning endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct StateResponse {
    pub state: StatePayload,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<RoomKeyError> for ApiError {
    fn from(err: RoomKeyError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::NotFound(err.to_string())
    }
}

/// Handler for `POST /start`.
///
/// Starts (or reuses) the agent for the resolved room and returns its state.
pub async fn start_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<StartRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    let (key, room_url) = RoomKey::resolve(
        payload.domain.as_deref(),
        &payload.room,
        payload.room_url.as_deref(),
    )?;

    tracing::info!(room = %key, room_url = %room_url, "start requested");

    let snapshot = state
        .registry
        .start_or_reuse(StartParams {
            key,
            room_url,
            token: payload.token,
            directive: payload.directive,
        })
        .await;

    Ok(Json(StateResponse { state: snapshot }))
}

/// Handler for `POST /control`.
pub async fn control_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ControlRequest>,
) -> Result<Json<StateResponse>, ApiError> {
    let (key, control) = payload.into_parts();
    tracing::info!(
        room = %key,
        action = %control.action,
        requested_by = control.requester(),
        "control requested"
    );

    let snapshot = state.registry.control(&key, control).await?;
    Ok(Json(StateResponse { state: snapshot }))
}

/// Handler for `GET /state`.
///
/// Returns the last recorded snapshot, including rooms whose agent has
/// already disconnected.
pub async fn get_state_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<StateQuery>,
) -> Result<Json<StateResponse>, ApiError> {
    let key = RoomKey::new(query.domain, query.room);
    let snapshot = state.registry.get_state(&key)?;
    Ok(Json(StateResponse { state: snapshot }))
}
