//! # Hub Test Utilities
//!
//! Shared test utilities for the Coderoom hub and room client.
//!
//! This crate provides mock implementations and test fixtures for isolated
//! testing without a database, a media stack or a live hub.
//!
//! ## Modules
//!
//! - `mock_store` - Recording `RoomStore` with latency/failure injection
//! - `mock_media` - Mock media engine driving peer links
//! - `mock_transport` - Scripted hub transport for the Join Orchestrator
//! - `signaling_bus` - In-memory relay between two peer managers
//! - `server_harness` - Real hub on a random local port
//! - `fixtures` - Pre-configured rooms, profiles and participants
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     // Store holding one password-protected room
//!     let store = MockRoomStore::new()
//!         .with_room(TestRoom::new("R1").with_owner("U1").with_password("p1"));
//!
//!     // Run the hub against it and inspect the writes
//!     // ...
//!     assert_eq!(store.call_count(StoreOp::PersistParticipant), 1);
//! }
//! ```
//!
//! ## Test Patterns
//!
//! ### Peer negotiation
//!
//! ```rust,ignore
//! let engine_a = MockMediaEngine::new().with_auto_connect();
//! let engine_b = MockMediaEngine::new().with_auto_connect();
//! let capture = SharedCapture::default();
//!
//! let mut a = Endpoint::create("a", "U1", Arc::new(engine_a.clone()), &capture, config);
//! let mut b = Endpoint::create("b", "U2", Arc::new(engine_b.clone()), &capture, config);
//!
//! let mut bus = SignalingBus::new();
//! a.manager.reconcile(&[participant("U2", "b")]).await;
//! b.manager.reconcile(&[participant("U1", "a")]).await;
//! bus.pump(&mut a, &mut b).await;
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_store;
pub mod mock_transport;
pub mod server_harness;
pub mod signaling_bus;

pub use fixtures::*;
pub use mock_media::{MediaCall, MockMediaEngine};
pub use mock_store::{MockRoomStore, StoreCall, StoreOp};
pub use mock_transport::{JoinReply, MockHubTransport};
pub use server_harness::TestHubServer;
pub use signaling_bus::{settle, Delivered, Endpoint, SignalingBus};
