//! Peer manager.
//!
//! Owns the peer links of one room session. It keeps the set of links in
//! line with the presence view, routes inbound signaling to the right link,
//! and holds candidates for remotes that have no link yet.
//!
//! The mesh is built over the de-duplicated presence view, which shows the
//! newest connection of each user. An older tab of the local user is not in
//! that view, so it links to nobody; offers and retry requests from
//! connections outside the view are ignored rather than answered with a
//! link the next presence update would close again.

use crate::config::PeerConfig;
use crate::peer::link::{LinkContext, OutboundSignal, PeerLink, PeerLinkHandle};
use crate::peer::media::{MediaEngine, SharedCapture};
use crate::peer::state::{PeerState, PeerStateEvent};

use common::protocol::ServerEvent;
use common::types::{ConnectionId, IceCandidate, Participant, RoomId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Candidates kept per remote that has no link yet.
const ORPHAN_CANDIDATE_LIMIT: usize = 64;

/// Capacity of the state event broadcast.
const STATE_EVENT_BUFFER: usize = 256;

struct ManagedLink {
    handle: PeerLinkHandle,
    task_handle: JoinHandle<()>,
}

/// Links of one room session, keyed by remote connection.
pub struct PeerManager {
    room_id: RoomId,
    local_user: UserId,
    ctx: LinkContext,
    links: HashMap<ConnectionId, ManagedLink>,
    /// Remote connections the presence view says to link with.
    wanted: HashSet<ConnectionId>,
    orphan_candidates: HashMap<ConnectionId, Vec<IceCandidate>>,
    cancel_token: CancellationToken,
}

impl PeerManager {
    /// Create a manager for `local` inside `room_id`.
    ///
    /// Returns the receiver of signals the links want relayed; the caller
    /// forwards them to the hub (see [`OutboundSignal::into_client_event`]).
    pub fn new(
        room_id: RoomId,
        local: ConnectionId,
        local_user: UserId,
        engine: Arc<dyn MediaEngine>,
        capture: &SharedCapture,
        config: PeerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundSignal>) {
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(STATE_EVENT_BUFFER);

        let manager = Self {
            room_id,
            local_user,
            ctx: LinkContext {
                local,
                engine,
                capture: capture.subscribe(),
                config,
                signals,
                events,
            },
            links: HashMap::new(),
            wanted: HashSet::new(),
            orphan_candidates: HashMap::new(),
            cancel_token: CancellationToken::new(),
        };
        (manager, signals_rx)
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub fn local(&self) -> &ConnectionId {
        &self.ctx.local
    }

    /// Stream of every link state transition.
    #[must_use]
    pub fn subscribe_states(&self) -> broadcast::Receiver<PeerStateEvent> {
        self.ctx.events.subscribe()
    }

    #[must_use]
    pub fn link(&self, remote: &ConnectionId) -> Option<&PeerLinkHandle> {
        self.links.get(remote).map(|link| &link.handle)
    }

    /// Remotes with a link that is still running.
    #[must_use]
    pub fn active_remotes(&self) -> Vec<ConnectionId> {
        let mut remotes: Vec<_> = self
            .links
            .iter()
            .filter(|(_, link)| !link.handle.is_closed())
            .map(|(remote, _)| remote.clone())
            .collect();
        remotes.sort();
        remotes
    }

    /// Number of candidates waiting for a link to `remote`.
    #[must_use]
    pub fn orphan_candidate_count(&self, remote: &ConnectionId) -> usize {
        self.orphan_candidates.get(remote).map_or(0, Vec::len)
    }

    /// State of the link to `remote`, `None` without a live link.
    pub async fn link_state(&self, remote: &ConnectionId) -> Option<PeerState> {
        let link = self.links.get(remote)?;
        link.handle.state().await.ok()
    }

    /// Apply one hub event to the session.
    #[instrument(skip_all, name = "client.peer.manager", fields(event = event.name()))]
    pub async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::RoomSnapshot(snapshot) if snapshot.room_id == self.room_id => {
                self.reconcile(&snapshot.participants).await;
            }
            ServerEvent::PresenceChanged {
                room_id,
                participants,
                ..
            }
            | ServerEvent::UserJoined {
                room_id,
                participants,
                ..
            }
            | ServerEvent::UserLeft {
                room_id,
                participants,
                ..
            } if room_id == self.room_id => {
                self.reconcile(&participants).await;
            }

            ServerEvent::Offer { sender, payload } => {
                let Some(link) = self.wanted_link(&sender) else {
                    debug!(target: "client.peer", remote = %sender, "Ignoring offer from connection outside the mesh");
                    return;
                };
                if link.remote_offer(payload).await.is_err() {
                    debug!(target: "client.peer", remote = %sender, "Link stopped before offer");
                }
            }
            ServerEvent::Answer { sender, payload } => match self.live_link(&sender) {
                Some(link) => {
                    let _ = link.remote_answer(payload).await;
                }
                None => debug!(target: "client.peer", remote = %sender, "Answer for unknown peer"),
            },
            ServerEvent::IceCandidate { sender, payload } => match self.live_link(&sender) {
                Some(link) => {
                    let _ = link.remote_candidate(payload).await;
                }
                None => self.buffer_orphan(sender, payload),
            },
            ServerEvent::ConnectionRetry { sender } => match self.wanted_link(&sender) {
                Some(link) => {
                    let _ = link.retry_requested().await;
                }
                None => {
                    debug!(target: "client.peer", remote = %sender, "Ignoring retry request from connection outside the mesh");
                }
            },
            ServerEvent::RenegotiationRequested { sender } => match self.live_link(&sender) {
                Some(link) => {
                    let _ = link.renegotiation_requested().await;
                }
                None => {
                    debug!(target: "client.peer", remote = %sender, "Renegotiation request for unknown peer");
                }
            },

            _ => {}
        }
    }

    /// Create links for new remote connections and close links to departed
    /// ones. The local user's own connections are never linked, and a tab
    /// superseded by a newer one of the same user links to nobody.
    pub async fn reconcile(&mut self, participants: &[Participant]) {
        let superseded = participants
            .iter()
            .any(|p| p.user_id() == &self.local_user && p.connection_id != self.ctx.local);
        if superseded && !self.wanted.is_empty() {
            info!(target: "client.peer", "A newer tab of this user joined, leaving the mesh");
        }

        self.wanted = if superseded {
            HashSet::new()
        } else {
            participants
                .iter()
                .filter(|p| p.user_id() != &self.local_user && p.connection_id != self.ctx.local)
                .map(|p| p.connection_id.clone())
                .collect()
        };

        let departed: Vec<ConnectionId> = self
            .links
            .keys()
            .filter(|remote| !self.wanted.contains(*remote))
            .cloned()
            .collect();
        for remote in departed {
            self.close_link(&remote).await;
        }
        let wanted = &self.wanted;
        self.orphan_candidates
            .retain(|remote, _| wanted.contains(remote));

        let missing: Vec<ConnectionId> = self
            .wanted
            .iter()
            .filter(|remote| !self.links.contains_key(*remote))
            .cloned()
            .collect();
        for remote in missing {
            self.spawn_link(remote);
        }
    }

    /// Tell every link that local capabilities changed.
    pub async fn negotiation_needed(&self) {
        for link in self.links.values() {
            let _ = link.handle.negotiation_needed().await;
        }
    }

    /// Stop the link to `remote` and wait for it to release its connection.
    pub async fn close_link(&mut self, remote: &ConnectionId) {
        if let Some(link) = self.links.remove(remote) {
            info!(target: "client.peer", remote = %remote, "Closing peer link");
            link.handle.close();
            let _ = link.task_handle.await;
        }
        self.orphan_candidates.remove(remote);
    }

    /// Stop every link.
    pub async fn close(&mut self) {
        self.cancel_token.cancel();
        for (_, link) in self.links.drain() {
            let _ = link.task_handle.await;
        }
        self.orphan_candidates.clear();
    }

    /// Live link to a remote in the mesh, creating one if there is none or
    /// the old one has stopped. `None` for remotes outside the mesh.
    fn wanted_link(&mut self, remote: &ConnectionId) -> Option<PeerLinkHandle> {
        if !self.wanted.contains(remote) {
            return None;
        }
        if let Some(link) = self.live_link(remote) {
            return Some(link);
        }
        Some(self.spawn_link(remote.clone()))
    }

    fn live_link(&self, remote: &ConnectionId) -> Option<PeerLinkHandle> {
        self.links
            .get(remote)
            .filter(|link| !link.handle.is_closed())
            .map(|link| link.handle.clone())
    }

    fn spawn_link(&mut self, remote: ConnectionId) -> PeerLinkHandle {
        let buffered = self.orphan_candidates.remove(&remote).unwrap_or_default();
        debug!(
            target: "client.peer",
            remote = %remote,
            buffered = buffered.len(),
            "Creating peer link"
        );
        let (handle, task_handle) = PeerLink::spawn(
            self.ctx.clone(),
            remote.clone(),
            buffered,
            self.cancel_token.child_token(),
        );
        self.links.insert(
            remote,
            ManagedLink {
                handle: handle.clone(),
                task_handle,
            },
        );
        handle
    }

    fn buffer_orphan(&mut self, remote: ConnectionId, candidate: IceCandidate) {
        let buffer = self.orphan_candidates.entry(remote).or_default();
        if buffer.len() < ORPHAN_CANDIDATE_LIMIT {
            buffer.push(candidate);
        }
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
