//! Coderoom Room Client Library
//!
//! Client-side state machines for a shared coding room:
//!
//! - [`join`] - Join Orchestrator (authorize, register, retry with deadline)
//! - [`peer`] - Peer Connection Orchestrator, one actor per remote connection
//! - [`transport`] - Hub transport trait and the WebSocket/HTTP client
//!
//! The UI observes joins through `tokio::sync::watch` and peer links
//! through a `tokio::sync::broadcast` of [`peer::PeerStateEvent`]s.

#![warn(clippy::pedantic)]

pub mod config;
pub mod errors;
pub mod join;
pub mod peer;
pub mod transport;

pub use config::ClientConfig;
pub use errors::{JoinError, PeerError, TransportError};
pub use join::{JoinOrchestrator, JoinOutcome, JoinState};
pub use peer::{PeerManager, PeerState, PeerStateEvent, SharedCapture};
pub use transport::{HubClient, HubTransport};
