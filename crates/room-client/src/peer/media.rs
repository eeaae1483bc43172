//! Media collaborator seams and the shared capture state.
//!
//! The actual capture/encoding stack lives behind [`MediaEngine`] and
//! [`MediaConnection`]. Links only drive negotiation through these traits
//! and listen for [`MediaEvent`]s.

use crate::errors::PeerError;

use async_trait::async_trait;
use common::types::{ConnectionId, IceCandidate, SessionDescription};
use tokio::sync::{mpsc, watch};

/// Transport state reported by a media connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events a media connection reports back to its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    LocalCandidate(IceCandidate),
    Transport(TransportState),
}

/// Local capture toggles shared by every link of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureState {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
}

impl Default for CaptureState {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            video_enabled: true,
            screen_sharing: false,
        }
    }
}

/// One mutable capture state observed by all links.
///
/// Toggling mutes once; each link sees the change through its own
/// `watch::Receiver` and applies it to its connection.
#[derive(Debug, Clone)]
pub struct SharedCapture {
    sender: watch::Sender<CaptureState>,
}

impl SharedCapture {
    #[must_use]
    pub fn new(initial: CaptureState) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    #[must_use]
    pub fn current(&self) -> CaptureState {
        *self.sender.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.sender.subscribe()
    }

    pub fn set_audio(&self, enabled: bool) {
        self.sender
            .send_if_modified(|state| std::mem::replace(&mut state.audio_enabled, enabled) != enabled);
    }

    pub fn set_video(&self, enabled: bool) {
        self.sender
            .send_if_modified(|state| std::mem::replace(&mut state.video_enabled, enabled) != enabled);
    }

    pub fn set_screen_sharing(&self, enabled: bool) {
        self.sender.send_if_modified(|state| {
            std::mem::replace(&mut state.screen_sharing, enabled) != enabled
        });
    }
}

impl Default for SharedCapture {
    fn default() -> Self {
        Self::new(CaptureState::default())
    }
}

/// Factory for media connections.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create a connection towards `remote`. Local candidates and transport
    /// state changes are reported on `events`.
    async fn create_connection(
        &self,
        remote: &ConnectionId,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Box<dyn MediaConnection>, PeerError>;
}

/// One peer connection inside the media stack.
#[async_trait]
pub trait MediaConnection: Send {
    async fn create_offer(&mut self, ice_restart: bool) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&mut self, desc: SessionDescription)
        -> Result<(), PeerError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError>;

    /// Apply the shared capture state to this connection's tracks.
    ///
    /// Returns true when the change needs a new offer/answer round.
    async fn apply_capture(&mut self, capture: CaptureState) -> Result<bool, PeerError>;

    /// Close the connection and release the tracks attached to it.
    async fn close(&mut self);
}
