//! Peer Connection Orchestrator.
//!
//! ```text
//! PeerManager (one per room session)
//! └── PeerLink (one per remote connection)
//!     └── MediaConnection (owned by the link, replaced on recreate)
//! ```
//!
//! Links talk to the media stack through [`MediaEngine`] and
//! [`MediaConnection`] and to their remote through [`OutboundSignal`]s,
//! which the owner of the manager forwards to the hub.

pub mod link;
pub mod manager;
pub mod media;
pub mod state;

pub use link::{LinkContext, OutboundSignal, PeerLink, PeerLinkHandle, PeerSignal};
pub use manager::PeerManager;
pub use media::{
    CaptureState, MediaConnection, MediaEngine, MediaEvent, SharedCapture, TransportState,
};
pub use state::{PeerState, PeerStateEvent};
