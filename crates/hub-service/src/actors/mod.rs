//! Actor model for the hub.
//!
//! ```text
//! HubControllerActor (singleton)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns presence, admitted users and the live document
//!         └── fans events out to ConnectionActors
//!             └── ConnectionActor (one per WebSocket)
//! ```
//!
//! Cancellation tokens follow the same tree: cancelling the controller
//! stops every room and every connection. The document writer sits outside
//! the tree so rooms can flush into it while they stop.

pub mod connection;
pub mod controller;
pub mod messages;
pub mod metrics;
pub mod room;

pub use connection::{ChannelSink, ConnectionActor, ConnectionActorHandle, OutboundSink};
pub use controller::HubControllerActorHandle;
pub use messages::{ControllerStatus, JoinAccepted, RoomState, RoomUpdate};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use room::{RoomActor, RoomActorHandle, RoomDeps, RoomSettings};
