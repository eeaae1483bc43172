//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate and adds
//! [`RoomPassword`], the wrapper used for room passwords on the wire.
//!
//! # Compile-Time Safety
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so any
//! struct deriving `Debug` that contains a secret gets safe logging behaviour
//! for free. The same holds for `RoomPassword`, which also appears inside
//! protocol events that are logged at debug level.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, RoomPassword};
//!
//! let password = RoomPassword::from("hunter2");
//! assert!(!format!("{password:?}").contains("hunter2"));
//! assert_eq!(password.expose_secret(), "hunter2");
//! ```
//!
//! # Serde Integration
//!
//! `SecretString` only implements `Deserialize`. `RoomPassword` implements
//! both directions because the client has to send it to the hub; the value is
//! exposed only at the serialization boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// A room password supplied by a joining user.
#[derive(Clone)]
pub struct RoomPassword(SecretString);

impl RoomPassword {
    /// Access the plaintext password.
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// True when the password is empty after trimming whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl From<&str> for RoomPassword {
    fn from(value: &str) -> Self {
        Self(SecretString::from(value))
    }
}

impl From<String> for RoomPassword {
    fn from(value: String) -> Self {
        Self(SecretString::from(value))
    }
}

impl fmt::Debug for RoomPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoomPassword([REDACTED])")
    }
}

impl Serialize for RoomPassword {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.expose_secret())
    }
}

impl<'de> Deserialize<'de> for RoomPassword {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw))
    }
}
