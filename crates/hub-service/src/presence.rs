//! Presence Registry for one room.
//!
//! A user may hold several live connections (browser tabs) in the same room.
//! Entries are kept per connection, grouped by user. The de-duplicated view
//! handed to clients carries one [`Participant`] per user: the connection
//! registered most recently.
//!
//! Membership changes are reported only at the edges: the first connection
//! of a user makes them present, removing the last one makes them absent.
//! Everything in between is silent.
//!
//! Owned exclusively by a `RoomActor`; no locking.

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, Participant, UserId, UserProfile};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct PresenceEntry {
    profile: UserProfile,
    connection_id: ConnectionId,
    joined_at: DateTime<Utc>,
    seq: u64,
}

impl PresenceEntry {
    fn to_participant(&self) -> Participant {
        Participant {
            profile: self.profile.clone(),
            connection_id: self.connection_id.clone(),
            joined_at: self.joined_at,
        }
    }
}

/// Result of removing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unregistration {
    /// The user's last connection is gone. Carries the entry that was shown
    /// in the de-duplicated view.
    LastConnection(Participant),
    /// The user still has other connections in the room.
    StillPresent,
    /// The connection was not registered.
    NotRegistered,
}

/// Live presence of one room.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    users: HashMap<UserId, Vec<PresenceEntry>>,
    by_connection: HashMap<ConnectionId, UserId>,
    next_seq: u64,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for the user in `profile`.
    ///
    /// Returns `true` when this is the user's first connection in the room,
    /// i.e. the user just became present. Registering an already registered
    /// connection is a no-op and returns `false`.
    pub fn register(&mut self, connection_id: ConnectionId, profile: UserProfile) -> bool {
        if self.by_connection.contains_key(&connection_id) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let user_id = profile.user_id.clone();
        self.by_connection
            .insert(connection_id.clone(), user_id.clone());

        let entries = self.users.entry(user_id).or_default();
        let first = entries.is_empty();
        entries.push(PresenceEntry {
            profile,
            connection_id,
            joined_at: Utc::now(),
            seq,
        });
        first
    }

    /// Remove exactly the matching connection.
    pub fn unregister(&mut self, connection_id: &ConnectionId) -> Unregistration {
        let Some(user_id) = self.by_connection.remove(connection_id) else {
            return Unregistration::NotRegistered;
        };
        let Some(entries) = self.users.get_mut(&user_id) else {
            return Unregistration::NotRegistered;
        };

        let Some(pos) = entries
            .iter()
            .position(|e| e.connection_id == *connection_id)
        else {
            return Unregistration::NotRegistered;
        };
        let removed = entries.remove(pos);

        if entries.is_empty() {
            self.users.remove(&user_id);
            Unregistration::LastConnection(removed.to_participant())
        } else {
            Unregistration::StillPresent
        }
    }

    /// De-duplicated view: one participant per user, the newest connection,
    /// ordered by when that connection registered.
    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        let mut newest: Vec<&PresenceEntry> = self
            .users
            .values()
            .filter_map(|entries| entries.iter().max_by_key(|e| e.seq))
            .collect();
        newest.sort_by_key(|e| e.seq);
        newest.into_iter().map(PresenceEntry::to_participant).collect()
    }

    /// The view entry for one user.
    #[must_use]
    pub fn participant(&self, user_id: &UserId) -> Option<Participant> {
        self.users
            .get(user_id)
            .and_then(|entries| entries.iter().max_by_key(|e| e.seq))
            .map(PresenceEntry::to_participant)
    }

    /// Number of distinct users present.
    #[must_use]
    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Number of live connections across all users.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }

    #[must_use]
    pub fn contains_connection(&self, connection_id: &ConnectionId) -> bool {
        self.by_connection.contains_key(connection_id)
    }

    #[must_use]
    pub fn user_of(&self, connection_id: &ConnectionId) -> Option<&UserId> {
        self.by_connection.get(connection_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}
