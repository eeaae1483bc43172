//! Common data types for Coderoom components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a room
    RoomId
);

string_id!(
    /// Unique identifier for a user (stable across connections)
    UserId
);

string_id!(
    /// Unique identifier for one live connection (one browser tab)
    ///
    /// Ordering is lexicographic on the string form; peers use it to decide
    /// which side initiates negotiation.
    ConnectionId
);

impl ConnectionId {
    /// Create a new random connection ID
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Profile fields attached to a presence entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// Profile with only an identity; the display name falls back to the id.
    #[must_use]
    pub fn anonymous(user_id: UserId) -> Self {
        let display_name = user_id.to_string();
        Self {
            user_id,
            display_name,
            avatar_url: None,
        }
    }
}

/// One entry of the de-duplicated presence view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub profile: UserProfile,
    /// Newest live connection of this user in the room.
    pub connection_id: ConnectionId,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.profile.user_id
    }
}

/// Durable document state of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    pub content: String,
    pub language: String,
}

/// Cursor location inside the shared document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub line: u32,
    pub column: u32,
    /// End of the selection, when one is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<(u32, u32)>,
}

/// Kind of chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Code,
    System,
}

/// Append-only chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

/// Authorization-relevant fields of a room, read as one consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAuthSnapshot {
    pub room_id: RoomId,
    pub is_private: bool,
    /// bcrypt hash of the room password, if the room has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub owner_id: UserId,
    /// Historical participants (append-only).
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub shared_with: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentSnapshot>,
}

/// State handed to a connection after it registers in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    /// The connection id the hub assigned to the receiver.
    pub connection_id: ConnectionId,
    pub participants: Vec<Participant>,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentSnapshot>,
    #[serde(default)]
    pub recent_messages: Vec<ChatMessage>,
}

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        let id = RoomId::from("room-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"room-1\"");
    }

    #[test]
    fn test_connection_ids_order_lexicographically() {
        let a = ConnectionId::from("a1");
        let b = ConnectionId::from("b0");
        assert!(a < b);
        assert!(ConnectionId::from("10") < ConnectionId::from("9"));
    }

    #[test]
    fn test_generated_connection_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
    }

    #[test]
    fn test_chat_message_uses_type_field() {
        let msg = ChatMessage {
            room_id: RoomId::from("r"),
            sender_id: UserId::from("u"),
            content: "hi".to_string(),
            kind: MessageKind::Code,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "code");
        assert_eq!(json["senderId"], "u");
    }
}
