//! Pre-configured test data for hub and client tests.
//!
//! - Rooms with owners, passwords, share lists and documents
//! - Participants and profiles

use chrono::Utc;
use common::types::{
    ConnectionId, DocumentSnapshot, Participant, RoomAuthSnapshot, RoomId, UserId, UserProfile,
};
use uuid::Uuid;

/// bcrypt cost used for fixture passwords. Low so tests stay fast.
pub const TEST_BCRYPT_COST: u32 = 4;

/// Test room fixture.
#[derive(Debug, Clone)]
pub struct TestRoom {
    pub id: String,
    pub owner: String,
    pub is_private: bool,
    pub password: Option<String>,
    pub participants: Vec<String>,
    pub shared_with: Vec<String>,
    pub document: Option<DocumentSnapshot>,
}

impl TestRoom {
    /// Public room without a password, owned by `U1`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: "U1".to_string(),
            is_private: false,
            password: None,
            participants: Vec::new(),
            shared_with: Vec::new(),
            document: None,
        }
    }

    /// Room with a random ID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Protect the room with a password (stored as a bcrypt hash).
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    #[must_use]
    pub fn shared_with(mut self, user: impl Into<String>) -> Self {
        self.shared_with.push(user.into());
        self
    }

    /// Add a historical participant.
    #[must_use]
    pub fn with_participant(mut self, user: impl Into<String>) -> Self {
        self.participants.push(user.into());
        self
    }

    #[must_use]
    pub fn with_document(mut self, content: impl Into<String>, language: impl Into<String>) -> Self {
        self.document = Some(DocumentSnapshot {
            content: content.into(),
            language: language.into(),
        });
        self
    }

    #[must_use]
    pub fn room_id(&self) -> RoomId {
        RoomId::from(self.id.as_str())
    }

    /// Build the snapshot a store would hold for this room.
    #[must_use]
    pub fn build(&self) -> RoomAuthSnapshot {
        RoomAuthSnapshot {
            room_id: self.room_id(),
            is_private: self.is_private,
            password_hash: self
                .password
                .as_ref()
                .map(|p| bcrypt::hash(p, TEST_BCRYPT_COST).expect("bcrypt hash")),
            owner_id: UserId::from(self.owner.as_str()),
            participants: self
                .participants
                .iter()
                .map(|u| UserId::from(u.as_str()))
                .collect(),
            shared_with: self
                .shared_with
                .iter()
                .map(|u| UserId::from(u.as_str()))
                .collect(),
            document: self.document.clone(),
        }
    }
}

impl From<TestRoom> for RoomAuthSnapshot {
    fn from(room: TestRoom) -> Self {
        room.build()
    }
}

/// Profile whose display name is derived from the id.
#[must_use]
pub fn profile(user: &str) -> UserProfile {
    UserProfile {
        user_id: UserId::from(user),
        display_name: format!("User {user}"),
        avatar_url: None,
    }
}

/// Presence entry for `user` on `connection`.
#[must_use]
pub fn participant(user: &str, connection: &str) -> Participant {
    Participant {
        profile: profile(user),
        connection_id: ConnectionId::from(connection),
        joined_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_defaults() {
        let room = TestRoom::new("R1").build();
        assert_eq!(room.room_id, RoomId::from("R1"));
        assert_eq!(room.owner_id, UserId::from("U1"));
        assert!(!room.is_private);
        assert!(room.password_hash.is_none());
    }

    #[test]
    fn test_password_is_hashed() {
        let room = TestRoom::new("R1").with_password("p1").build();
        let hash = room.password_hash.unwrap();
        assert_ne!(hash, "p1");
        assert!(bcrypt::verify("p1", &hash).unwrap());
    }

    #[test]
    fn test_access_lists() {
        let room = TestRoom::new("R2")
            .private()
            .shared_with("U3")
            .with_participant("U4")
            .build();
        assert!(room.is_private);
        assert_eq!(room.shared_with, vec![UserId::from("U3")]);
        assert_eq!(room.participants, vec![UserId::from("U4")]);
    }
}
