//! Common utilities and types shared across Coderoom components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for identifiers and the shared data model
pub mod types;

/// Module for common configuration fragments
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for the hub <-> client wire protocol
pub mod protocol;
