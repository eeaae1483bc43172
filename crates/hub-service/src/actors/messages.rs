//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use crate::errors::HubError;
use crate::signaling::Signal;

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;

use common::protocol::ServerEvent;
use common::secret::RoomPassword;
use common::types::{
    ConnectionId, CursorPosition, DocumentSnapshot, MessageKind, Participant, RoomId,
    RoomSnapshot, UserProfile,
};
use tokio::sync::oneshot;

/// Messages sent to `HubControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Register a connection in a room, creating the room actor if needed.
    Join {
        room_id: RoomId,
        connection: ConnectionActorHandle,
        profile: UserProfile,
        password: Option<RoomPassword>,
        respond_to: oneshot::Sender<Result<JoinAccepted, HubError>>,
    },

    /// Explicit `leaveRoom` from a connection.
    Leave {
        room_id: RoomId,
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },

    /// The connection's socket is gone.
    Disconnect { connection_id: ConnectionId },

    /// A room actor has no connections left.
    ///
    /// `joins_seen` lets the controller tell whether a join it forwarded is
    /// still queued in the room's mailbox.
    RoomEmpty { room_id: RoomId, joins_seen: u64 },

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting joins and shut every room down. Answered once all
    /// room actors have stopped.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), HubError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Authorize and register a connection.
    Join {
        connection: ConnectionActorHandle,
        profile: UserProfile,
        password: Option<RoomPassword>,
        respond_to: oneshot::Sender<Result<RoomSnapshot, HubError>>,
    },

    /// Remove a connection (explicit leave or disconnect).
    Leave { connection_id: ConnectionId },

    /// Document, cursor or chat update from a registered connection.
    Publish {
        connection_id: ConnectionId,
        update: RoomUpdate,
    },

    /// Point-to-point negotiation message.
    Signal {
        sender: ConnectionId,
        target: ConnectionId,
        signal: Signal,
    },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Room-wide updates published by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomUpdate {
    Document { delta: String, language: String },
    Cursor { position: CursorPosition },
    Chat { content: String, kind: MessageKind },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write an event to the client.
    Deliver { event: ServerEvent },

    /// Close the connection gracefully.
    Close { reason: String },

    /// Ping the actor to check liveness.
    Ping { respond_to: oneshot::Sender<()> },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinAccepted {
    /// Snapshot already delivered to the connection.
    pub snapshot: RoomSnapshot,
    /// Room the connection is now registered in; used for follow-up events.
    pub room: RoomActorHandle,
}

/// Status of the `HubControllerActor`.
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Current state of a room (for tests and debugging).
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    pub participants: Vec<Participant>,
    pub connection_count: usize,
    pub joins_seen: u64,
    pub document: Option<DocumentSnapshot>,
}
