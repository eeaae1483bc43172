//! Peer link state machine.

use common::types::ConnectionId;
use std::fmt;

/// Lifecycle of one peer link.
///
/// `New -> Negotiating -> Connected -> (Disconnected -> Reconnecting) ->
/// Closed`, with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Reconnecting,
    Closed,
    Failed,
}

impl PeerState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PeerState::New => "new",
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Reconnecting => "reconnecting",
            PeerState::Closed => "closed",
            PeerState::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Closed | PeerState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: PeerState) -> bool {
        use PeerState::{Closed, Connected, Disconnected, Failed, Negotiating, New, Reconnecting};

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Closed | Failed)
                | (New, Negotiating | Connected | Reconnecting)
                | (Negotiating, Connected | Reconnecting)
                | (Connected, Disconnected | Reconnecting)
                | (Disconnected, Connected | Reconnecting)
                | (Reconnecting, Negotiating | Connected)
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state transition, published to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStateEvent {
    pub remote: ConnectionId,
    pub from: PeerState,
    pub to: PeerState,
    /// Recovery attempt the link is on (0 when healthy).
    pub attempt: u32,
}

impl PeerStateEvent {
    /// `Failed` is the only state the UI treats as fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.to, PeerState::Failed)
    }
}
