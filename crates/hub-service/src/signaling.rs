//! Signaling Relay.
//!
//! Negotiation messages are point-to-point: they go to exactly one target
//! connection in the sender's room and are never broadcast. Routing is a
//! pure decision over the room's presence; delivery is done by the room
//! actor.

use crate::presence::PresenceRegistry;

use common::protocol::{ClientEvent, ServerEvent};
use common::types::{ConnectionId, IceCandidate, SessionDescription};

/// Negotiation message kinds, used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    RetryRequest,
    RenegotiateRequest,
}

impl SignalKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "iceCandidate",
            SignalKind::RetryRequest => "retryRequest",
            SignalKind::RenegotiateRequest => "renegotiateRequest",
        }
    }
}

/// Payload of a negotiation message, without routing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    RetryRequest,
    RenegotiateRequest,
}

impl Signal {
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        match self {
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::IceCandidate(_) => SignalKind::IceCandidate,
            Signal::RetryRequest => SignalKind::RetryRequest,
            Signal::RenegotiateRequest => SignalKind::RenegotiateRequest,
        }
    }

    /// Event delivered to the target, stamped with the sender's connection.
    #[must_use]
    pub fn into_event(self, sender: ConnectionId) -> ServerEvent {
        match self {
            Signal::Offer(payload) => ServerEvent::Offer { sender, payload },
            Signal::Answer(payload) => ServerEvent::Answer { sender, payload },
            Signal::IceCandidate(payload) => ServerEvent::IceCandidate { sender, payload },
            Signal::RetryRequest => ServerEvent::ConnectionRetry { sender },
            Signal::RenegotiateRequest => ServerEvent::RenegotiationRequested { sender },
        }
    }

    /// Split a client negotiation event into target and payload.
    ///
    /// Returns `None` for events that are not negotiation messages.
    #[must_use]
    pub fn from_client_event(event: ClientEvent) -> Option<(ConnectionId, Signal)> {
        match event {
            ClientEvent::Offer {
                target, payload, ..
            } => Some((target, Signal::Offer(payload))),
            ClientEvent::Answer {
                target, payload, ..
            } => Some((target, Signal::Answer(payload))),
            ClientEvent::IceCandidate {
                target, payload, ..
            } => Some((target, Signal::IceCandidate(payload))),
            ClientEvent::RetryRequest { target, .. } => Some((target, Signal::RetryRequest)),
            ClientEvent::RenegotiateRequest { target, .. } => {
                Some((target, Signal::RenegotiateRequest))
            }
            _ => None,
        }
    }
}

/// Where a negotiation message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDecision {
    /// Deliver to the target connection.
    Forward,
    /// Sender is not registered in this room; reject.
    SenderNotInRoom,
    /// Target is not (or no longer) registered in this room. Dropped
    /// silently; the target usually just left.
    TargetNotInRoom,
    /// Sender addressed itself.
    SelfTarget,
}

/// Decide how to route a message from `sender` to `target`.
#[must_use]
pub fn route(
    presence: &PresenceRegistry,
    sender: &ConnectionId,
    target: &ConnectionId,
) -> RelayDecision {
    if !presence.contains_connection(sender) {
        RelayDecision::SenderNotInRoom
    } else if sender == target {
        RelayDecision::SelfTarget
    } else if !presence.contains_connection(target) {
        RelayDecision::TargetNotInRoom
    } else {
        RelayDecision::Forward
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::{RoomId, UserId, UserProfile};

    fn presence_with(conns: &[(&str, &str)]) -> PresenceRegistry {
        let mut presence = PresenceRegistry::new();
        for (conn, user) in conns {
            presence.register(
                ConnectionId::from(*conn),
                UserProfile::anonymous(UserId::from(*user)),
            );
        }
        presence
    }

    #[test]
    fn test_route_forward_within_room() {
        let presence = presence_with(&[("a", "U1"), ("b", "U2")]);
        assert_eq!(
            route(&presence, &ConnectionId::from("a"), &ConnectionId::from("b")),
            RelayDecision::Forward
        );
    }

    #[test]
    fn test_route_between_tabs_of_same_user() {
        let presence = presence_with(&[("a", "U1"), ("b", "U1")]);
        assert_eq!(
            route(&presence, &ConnectionId::from("a"), &ConnectionId::from("b")),
            RelayDecision::Forward
        );
    }

    #[test]
    fn test_route_unknown_target() {
        let presence = presence_with(&[("a", "U1")]);
        assert_eq!(
            route(&presence, &ConnectionId::from("a"), &ConnectionId::from("gone")),
            RelayDecision::TargetNotInRoom
        );
    }

    #[test]
    fn test_route_sender_outside_room() {
        let presence = presence_with(&[("b", "U2")]);
        assert_eq!(
            route(&presence, &ConnectionId::from("a"), &ConnectionId::from("b")),
            RelayDecision::SenderNotInRoom
        );
    }

    #[test]
    fn test_route_self_target() {
        let presence = presence_with(&[("a", "U1")]);
        assert_eq!(
            route(&presence, &ConnectionId::from("a"), &ConnectionId::from("a")),
            RelayDecision::SelfTarget
        );
    }

    #[test]
    fn test_client_event_split() {
        let event = ClientEvent::IceCandidate {
            room_id: RoomId::from("R1"),
            target: ConnectionId::from("b"),
            payload: IceCandidate::new("candidate:1"),
        };
        let (target, signal) = Signal::from_client_event(event).unwrap();
        assert_eq!(target, ConnectionId::from("b"));
        assert_eq!(signal.kind(), SignalKind::IceCandidate);

        assert!(Signal::from_client_event(ClientEvent::Ping).is_none());
    }

    #[test]
    fn test_retry_request_becomes_connection_retry() {
        let event = Signal::RetryRequest.into_event(ConnectionId::from("a"));
        assert_eq!(
            event,
            ServerEvent::ConnectionRetry {
                sender: ConnectionId::from("a")
            }
        );
    }

    #[test]
    fn test_renegotiate_request_is_point_to_point() {
        let event = ClientEvent::RenegotiateRequest {
            room_id: RoomId::from("R1"),
            target: ConnectionId::from("a"),
        };
        let (target, signal) = Signal::from_client_event(event).unwrap();
        assert_eq!(target, ConnectionId::from("a"));
        assert_eq!(signal.kind().as_str(), "renegotiateRequest");
        assert_eq!(
            signal.into_event(ConnectionId::from("b")),
            ServerEvent::RenegotiationRequested {
                sender: ConnectionId::from("b")
            }
        );
    }

    #[test]
    fn test_offer_keeps_payload() {
        let event = Signal::Offer(SessionDescription::offer("v=0")).into_event(ConnectionId::from("a"));
        match event {
            ServerEvent::Offer { sender, payload } => {
                assert_eq!(sender, ConnectionId::from("a"));
                assert_eq!(payload.sdp, "v=0");
            }
            other => unreachable!("expected offer, got {other:?}"),
        }
    }
}
