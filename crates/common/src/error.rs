//! Common error types for Coderoom components.

use thiserror::Error;

/// Errors shared by the hub and the client crates.
#[derive(Error, Debug)]
pub enum CoderoomError {
    /// Persistence collaborator failed
    #[error("Store error: {0}")]
    Store(String),

    /// Network transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoderoomError {
    fn from(err: serde_json::Error) -> Self {
        CoderoomError::Serialization(err.to_string())
    }
}

/// Result type alias using `CoderoomError`
pub type Result<T> = std::result::Result<T, CoderoomError>;
