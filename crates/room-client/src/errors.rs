//! Client error types.
//!
//! `JoinError` mirrors the hub's wire codes so a `joinRejected` event or an
//! HTTP error body maps back to the same variant the hub raised.

use thiserror::Error;

/// Why a join did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("Password required")]
    PasswordRequired,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Room not found")]
    RoomNotFound,

    #[error("Forbidden")]
    Forbidden,

    /// Every attempt ran past its deadline.
    #[error("Join timed out")]
    Timeout,

    /// Superseded by `cancel`, `leave` or a newer attempt.
    #[error("Join cancelled")]
    Cancelled,

    /// Network failure talking to the hub.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Any other rejection the hub reported.
    #[error("Rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl JoinError {
    /// Map a hub wire code back to an error.
    #[must_use]
    pub fn from_code(code: &str, message: &str) -> Self {
        match code {
            "AUTH_REQUIRED" => JoinError::AuthRequired,
            "PASSWORD_REQUIRED" => JoinError::PasswordRequired,
            "INVALID_PASSWORD" => JoinError::InvalidPassword,
            "FORBIDDEN" => JoinError::Forbidden,
            "ROOM_NOT_FOUND" => JoinError::RoomNotFound,
            "TIMEOUT" => JoinError::Timeout,
            "UNAVAILABLE" => JoinError::Transport(message.to_string()),
            _ => JoinError::Rejected {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    /// Timeouts and transport failures are retried; authorization outcomes
    /// propagate immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, JoinError::Timeout | JoinError::Transport(_))
    }

    /// True for the errors that resolve by prompting for a password.
    #[must_use]
    pub const fn is_password_error(&self) -> bool {
        matches!(self, JoinError::PasswordRequired | JoinError::InvalidPassword)
    }
}

impl From<TransportError> for JoinError {
    fn from(err: TransportError) -> Self {
        JoinError::Transport(err.to_string())
    }
}

/// Failure of the hub connection itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Connection closed")]
    Closed,

    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),
}

/// Failure inside a peer link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    /// The media engine rejected an offer/answer/candidate step.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The media engine could not create or update a connection.
    #[error("Media error: {0}")]
    Media(String),

    /// The link actor is gone.
    #[error("Peer link closed")]
    Closed,
}
