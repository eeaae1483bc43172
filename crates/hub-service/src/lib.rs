//! Coderoom Hub Service Library
//!
//! The hub is the server side of a shared coding room:
//!
//! - Access control at join time (owner, share list, participants, password)
//! - Presence across several concurrent connections per user
//! - Point-to-point relay of media negotiation messages
//! - Document and cursor fan-out with debounced document persistence
//! - Room chat
//!
//! # Architecture
//!
//! ```text
//! HubControllerActor (singleton)
//! └── RoomActor (one per active room)
//!     └── ConnectionActor (one per WebSocket)
//!
//! DocumentWriter (singleton, debounced store writes)
//! ```
//!
//! Durable room state lives behind [`store::RoomStore`]; the hub keeps only
//! in-memory presence for the rooms that are currently active.
//!
//! # Modules
//!
//! - [`access`] - Access Control Gate
//! - [`presence`] - Presence Registry (per-room, de-duplicated by user)
//! - [`signaling`] - Signaling Relay routing
//! - [`sync`] - Debounced document writer
//! - [`actors`] - Actor hierarchy
//! - [`session`] / [`handlers`] / [`routes`] - WebSocket and HTTP surface

pub mod access;
pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod presence;
pub mod routes;
pub mod session;
pub mod signaling;
pub mod store;
pub mod sync;
