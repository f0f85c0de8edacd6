//! HTTP query handlers.
//!
//! - `GET /api/v1/ice-servers` - Configured ICE servers, returned verbatim
//! - `GET /api/v1/sessions` - Snapshots of every active session
//! - `GET /api/v1/sessions/:id` - One active session, 404 when not active

use crate::registry::SessionSnapshot;
use crate::routes::AppState;
use crate::signaling::IceServer;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Response body for `GET /api/v1/ice-servers`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

/// Response body for `GET /api/v1/sessions`.
#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSnapshot>,
}

#[instrument(skip_all, name = "relay.http.ice_servers")]
pub async fn get_ice_servers(State(state): State<Arc<AppState>>) -> Json<IceServersResponse> {
    Json(IceServersResponse {
        ice_servers: state.service.ice_servers().to_vec(),
    })
}

#[instrument(skip_all, name = "relay.http.list_sessions")]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.service.active_sessions(),
    })
}

#[instrument(skip_all, name = "relay.http.get_session", fields(session_id = %session_id))]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    state
        .service
        .session(&session_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
