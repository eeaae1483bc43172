//! Room authorization handler.
//!
//! `POST /rooms/{room_id}/authorize` lets a client find out, before opening
//! a WebSocket, whether it may join and whether it has to prompt for a
//! password. The same check is repeated inside `joinRoom`.

use crate::errors::HubError;
use crate::routes::AppState;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use common::secret::RoomPassword;
use common::types::{RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(default)]
    pub password: Option<RoomPassword>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub room_id: RoomId,
    /// Which rule admitted the caller.
    pub access: String,
}

/// Handler for POST /rooms/{room_id}/authorize
///
/// ## Response
///
/// - 200 OK: `{"roomId": "R1", "access": "password"}`
/// - 401: `AUTH_REQUIRED`, `PASSWORD_REQUIRED` or `INVALID_PASSWORD`
/// - 403: `FORBIDDEN`
/// - 404: `ROOM_NOT_FOUND`
#[instrument(skip_all, name = "hub.handlers.authorize", fields(room_id = %room_id))]
pub async fn authorize_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    headers: HeaderMap,
    body: Option<Json<AuthorizeRequest>>,
) -> Result<Json<AuthorizeResponse>, HubError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(UserId::from)
        .ok_or(HubError::Unauthenticated)?;

    let request = body.map(|Json(request)| request).unwrap_or_default();

    let grant = state
        .gate
        .check(&room_id, &user_id, request.password.as_ref())
        .await?;

    Ok(Json(AuthorizeResponse {
        room_id,
        access: grant.as_str().to_string(),
    }))
}
