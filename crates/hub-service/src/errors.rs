//! Hub error types.
//!
//! Errors map to stable string codes used both in HTTP responses and in
//! `joinRejected` / `error` events on the WebSocket. Internal details are
//! logged server-side but never sent to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Hub error type.
///
/// Maps to HTTP status codes and wire codes:
/// - `Unauthenticated`: 401 `AUTH_REQUIRED`
/// - `PasswordRequired`: 401 `PASSWORD_REQUIRED`
/// - `InvalidPassword`: 401 `INVALID_PASSWORD`
/// - `Forbidden`: 403 `FORBIDDEN`
/// - `RoomNotFound`: 404 `ROOM_NOT_FOUND`
/// - `NotInRoom`: 409 `NOT_IN_ROOM`
/// - `BadRequest`: 400 `BAD_REQUEST`
/// - `Draining`: 503 `UNAVAILABLE`
/// - `StoreTimeout`: 504 `TIMEOUT`
/// - Store, Config, Internal: 500 `INTERNAL_ERROR`
#[derive(Debug, Error)]
pub enum HubError {
    /// Caller identity missing.
    #[error("Authentication required")]
    Unauthenticated,

    /// Room has a password and none was supplied.
    #[error("Password required")]
    PasswordRequired,

    /// Supplied password does not match.
    #[error("Invalid password")]
    InvalidPassword,

    /// Private room, caller not on any access list.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Room does not exist.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Connection is not registered in the room named by the event.
    #[error("Not in room: {0}")]
    NotInRoom(String),

    /// Malformed or out-of-bounds client input.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Persistence collaborator failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Persistence collaborator did not answer in time.
    #[error("Store call timed out: {0}")]
    StoreTimeout(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hub is shutting down.
    #[error("Hub is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Stable wire code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            HubError::Unauthenticated => "AUTH_REQUIRED",
            HubError::PasswordRequired => "PASSWORD_REQUIRED",
            HubError::InvalidPassword => "INVALID_PASSWORD",
            HubError::Forbidden(_) => "FORBIDDEN",
            HubError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            HubError::NotInRoom(_) => "NOT_IN_ROOM",
            HubError::BadRequest(_) => "BAD_REQUEST",
            HubError::Draining => "UNAVAILABLE",
            HubError::StoreTimeout(_) => "TIMEOUT",
            HubError::Store(_) | HubError::Config(_) | HubError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            HubError::Unauthenticated | HubError::PasswordRequired | HubError::InvalidPassword => {
                StatusCode::UNAUTHORIZED
            }
            HubError::Forbidden(_) => StatusCode::FORBIDDEN,
            HubError::RoomNotFound(_) => StatusCode::NOT_FOUND,
            HubError::NotInRoom(_) => StatusCode::CONFLICT,
            HubError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HubError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            HubError::StoreTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            HubError::Store(_) | HubError::Config(_) | HubError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            HubError::Unauthenticated => "Sign in to join this room".to_string(),
            HubError::PasswordRequired => "This room requires a password".to_string(),
            HubError::InvalidPassword => "Incorrect room password".to_string(),
            HubError::Forbidden(_) => "You do not have access to this room".to_string(),
            HubError::RoomNotFound(_) => "Room not found".to_string(),
            HubError::NotInRoom(_) => "Join the room first".to_string(),
            HubError::BadRequest(reason) => reason.clone(),
            HubError::Draining => "Server is shutting down, please reconnect".to_string(),
            HubError::StoreTimeout(_) => "The room service is slow, please retry".to_string(),
            HubError::Store(_) | HubError::Config(_) | HubError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// True for errors a user resolves by supplying or correcting a password.
    #[must_use]
    pub const fn is_password_error(&self) -> bool {
        matches!(self, HubError::PasswordRequired | HubError::InvalidPassword)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        match &self {
            HubError::Store(err) | HubError::StoreTimeout(err) => {
                tracing::error!(target: "hub.store", error = %err, "Store operation failed");
            }
            HubError::Internal(err) | HubError::Config(err) => {
                tracing::error!(target: "hub.errors", error = %err, "Internal error");
            }
            _ => {}
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
