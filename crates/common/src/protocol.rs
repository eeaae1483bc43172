//! Wire protocol between room clients and the hub.
//!
//! Every frame is a JSON text message of the form
//! `{"type": "<camelCaseName>", "data": {...}}`. Field names inside `data`
//! are camelCase. `ping` carries no `data`.

use crate::secret::RoomPassword;
use crate::types::{
    ChatMessage, ConnectionId, CursorPosition, IceCandidate, MessageKind, Participant, RoomId,
    RoomSnapshot, SessionDescription, UserId, UserProfile,
};
use serde::{Deserialize, Serialize};

/// Events sent by a client to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinRoom {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<RoomPassword>,
        /// Display fields; the user id inside is ignored by the hub.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        profile: Option<UserProfile>,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    DocumentChange {
        room_id: RoomId,
        delta: String,
        language: String,
    },
    CursorChange {
        room_id: RoomId,
        position: CursorPosition,
    },
    SendMessage {
        room_id: RoomId,
        content: String,
        #[serde(default)]
        kind: MessageKind,
    },
    Offer {
        room_id: RoomId,
        target: ConnectionId,
        payload: SessionDescription,
    },
    Answer {
        room_id: RoomId,
        target: ConnectionId,
        payload: SessionDescription,
    },
    IceCandidate {
        room_id: RoomId,
        target: ConnectionId,
        payload: IceCandidate,
    },
    RetryRequest {
        room_id: RoomId,
        target: ConnectionId,
    },
    /// Ask the target (the initiator of the pair) for a fresh offer.
    RenegotiateRequest {
        room_id: RoomId,
        target: ConnectionId,
    },
    Ping,
}

impl ClientEvent {
    /// Event name used in logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "joinRoom",
            ClientEvent::LeaveRoom { .. } => "leaveRoom",
            ClientEvent::DocumentChange { .. } => "documentChange",
            ClientEvent::CursorChange { .. } => "cursorChange",
            ClientEvent::SendMessage { .. } => "sendMessage",
            ClientEvent::Offer { .. } => "offer",
            ClientEvent::Answer { .. } => "answer",
            ClientEvent::IceCandidate { .. } => "iceCandidate",
            ClientEvent::RetryRequest { .. } => "retryRequest",
            ClientEvent::RenegotiateRequest { .. } => "renegotiateRequest",
            ClientEvent::Ping => "ping",
        }
    }

    /// Room the event refers to, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            ClientEvent::JoinRoom { room_id, .. }
            | ClientEvent::LeaveRoom { room_id }
            | ClientEvent::DocumentChange { room_id, .. }
            | ClientEvent::CursorChange { room_id, .. }
            | ClientEvent::SendMessage { room_id, .. }
            | ClientEvent::Offer { room_id, .. }
            | ClientEvent::Answer { room_id, .. }
            | ClientEvent::IceCandidate { room_id, .. }
            | ClientEvent::RetryRequest { room_id, .. }
            | ClientEvent::RenegotiateRequest { room_id, .. } => Some(room_id),
            ClientEvent::Ping => None,
        }
    }
}

/// Events sent by the hub to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    RoomSnapshot(RoomSnapshot),
    JoinRejected {
        room_id: RoomId,
        code: String,
        message: String,
    },
    PresenceChanged {
        room_id: RoomId,
        participants: Vec<Participant>,
        count: usize,
    },
    UserJoined {
        room_id: RoomId,
        user: Participant,
        participants: Vec<Participant>,
    },
    UserLeft {
        room_id: RoomId,
        user: Participant,
        participants: Vec<Participant>,
    },
    DocumentUpdate {
        room_id: RoomId,
        delta: String,
        language: String,
        sender: UserId,
    },
    CursorUpdate {
        room_id: RoomId,
        user_id: UserId,
        position: CursorPosition,
    },
    NewMessage(ChatMessage),
    Offer {
        sender: ConnectionId,
        payload: SessionDescription,
    },
    Answer {
        sender: ConnectionId,
        payload: SessionDescription,
    },
    IceCandidate {
        sender: ConnectionId,
        payload: IceCandidate,
    },
    ConnectionRetry {
        sender: ConnectionId,
    },
    RenegotiationRequested {
        sender: ConnectionId,
    },
    Error {
        code: String,
        message: String,
    },
    Pong {
        date: String,
    },
}

impl ServerEvent {
    /// Event name used in logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::RoomSnapshot(_) => "roomSnapshot",
            ServerEvent::JoinRejected { .. } => "joinRejected",
            ServerEvent::PresenceChanged { .. } => "presenceChanged",
            ServerEvent::UserJoined { .. } => "userJoined",
            ServerEvent::UserLeft { .. } => "userLeft",
            ServerEvent::DocumentUpdate { .. } => "documentUpdate",
            ServerEvent::CursorUpdate { .. } => "cursorUpdate",
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::IceCandidate { .. } => "iceCandidate",
            ServerEvent::ConnectionRetry { .. } => "connectionRetry",
            ServerEvent::RenegotiationRequested { .. } => "renegotiationRequested",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }

    /// True for the point-to-point negotiation events.
    #[must_use]
    pub const fn is_signaling(&self) -> bool {
        matches!(
            self,
            ServerEvent::Offer { .. }
                | ServerEvent::Answer { .. }
                | ServerEvent::IceCandidate { .. }
                | ServerEvent::ConnectionRetry { .. }
                | ServerEvent::RenegotiationRequested { .. }
        )
    }
}
