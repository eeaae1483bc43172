//! Access Control Gate.
//!
//! Decides whether a user may enter a room. The decision is taken from a
//! single [`RoomAuthSnapshot`] read per request so concurrent joins never
//! observe a half-updated room.
//!
//! Rules, in order:
//! 1. The room must exist.
//! 2. Owner, share-list member or recorded participant is admitted without a
//!    password check.
//! 3. A room with a password requires a matching password.
//! 4. A private room without a password admits nobody else.

use crate::errors::HubError;
use crate::store::{timed, RoomStore};

use common::secret::RoomPassword;
use common::types::{RoomAuthSnapshot, RoomId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Rule that admitted a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGrant {
    Owner,
    SharedWith,
    Participant,
    Password,
    Public,
}

impl AccessGrant {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AccessGrant::Owner => "owner",
            AccessGrant::SharedWith => "shared",
            AccessGrant::Participant => "participant",
            AccessGrant::Password => "password",
            AccessGrant::Public => "public",
        }
    }

    /// True when the user was admitted through an access list rather than a
    /// password or an open room.
    #[must_use]
    pub const fn is_listed(&self) -> bool {
        matches!(
            self,
            AccessGrant::Owner | AccessGrant::SharedWith | AccessGrant::Participant
        )
    }
}

/// Evaluate the access rules against one snapshot.
///
/// `already_admitted` lets a room actor count users it admitted in-process
/// whose participant write has not reached the store yet.
///
/// # Errors
///
/// - `HubError::PasswordRequired` / `HubError::InvalidPassword` for password rooms
/// - `HubError::Forbidden` for private rooms
/// - `HubError::Internal` if the stored hash cannot be parsed
pub fn evaluate(
    snapshot: &RoomAuthSnapshot,
    user_id: &UserId,
    password: Option<&RoomPassword>,
    already_admitted: bool,
) -> Result<AccessGrant, HubError> {
    if snapshot.owner_id == *user_id {
        return Ok(AccessGrant::Owner);
    }
    if snapshot.shared_with.contains(user_id) {
        return Ok(AccessGrant::SharedWith);
    }
    if already_admitted || snapshot.participants.contains(user_id) {
        return Ok(AccessGrant::Participant);
    }

    if let Some(hash) = snapshot.password_hash.as_deref() {
        let supplied = match password {
            Some(p) if !p.is_blank() => p,
            _ => return Err(HubError::PasswordRequired),
        };

        let matches = bcrypt::verify(supplied.expose_secret(), hash)
            .map_err(|e| HubError::Internal(format!("Stored password hash unusable: {e}")))?;

        return if matches {
            Ok(AccessGrant::Password)
        } else {
            Err(HubError::InvalidPassword)
        };
    }

    if snapshot.is_private {
        return Err(HubError::Forbidden(format!(
            "room {} is private",
            snapshot.room_id
        )));
    }

    Ok(AccessGrant::Public)
}

/// Store-backed gate used by the HTTP authorize endpoint.
#[derive(Clone)]
pub struct AccessGate {
    store: Arc<dyn RoomStore>,
    store_timeout: Duration,
}

impl AccessGate {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Authorize `user_id` for `room_id`.
    ///
    /// # Errors
    ///
    /// `HubError::RoomNotFound` when the room does not exist, otherwise any
    /// error from [`evaluate`] or the store.
    #[instrument(skip_all, name = "hub.access.check", fields(room_id = %room_id, user_id = %user_id))]
    pub async fn check(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
        password: Option<&RoomPassword>,
    ) -> Result<AccessGrant, HubError> {
        let snapshot = timed(
            "fetch_auth_snapshot",
            self.store_timeout,
            self.store.fetch_auth_snapshot(room_id),
        )
        .await?
        .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;

        let result = evaluate(&snapshot, user_id, password, false);
        match &result {
            Ok(grant) => debug!(target: "hub.access", grant = grant.as_str(), "Access granted"),
            Err(e) => debug!(target: "hub.access", code = e.error_code(), "Access denied"),
        }
        result
    }
}
