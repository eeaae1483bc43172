//! Peer link actor.
//!
//! One actor per remote connection. Offers, answers, candidates, retry
//! requests and renegotiation triggers all go through one mailbox, so they
//! are applied in arrival order.
//!
//! # Negotiation rules
//!
//! - The side with the lexicographically smaller connection id is the
//!   initiator. Only the initiator offers; an offer arriving at the
//!   initiator while its own offer is outstanding is dropped.
//! - Remote candidates that arrive before the remote description are held
//!   and replayed in order once it is applied.
//! - A capability change on the non-initiator side is sent to the initiator
//!   as a `renegotiateRequest`. The initiator re-offers once any offer it
//!   has outstanding is answered.
//!
//! # Recovery
//!
//! A missed negotiation deadline or a disconnected/failed transport
//! schedules a recovery attempt. The first attempt after a `Disconnected`
//! report restarts ICE on the existing connection; every other attempt
//! tears the connection down, builds a new one, and asks the remote to do
//! the same with a `retryRequest`. Attempts are at least
//! `retry_min_spacing` apart and back off exponentially. After
//! `max_retries` the link is `Failed`.

use crate::config::PeerConfig;
use crate::errors::PeerError;
use crate::peer::media::{CaptureState, MediaConnection, MediaEngine, MediaEvent, TransportState};
use crate::peer::state::{PeerState, PeerStateEvent};

use common::protocol::{ClientEvent, ServerEvent};
use common::types::{ConnectionId, IceCandidate, RoomId, SessionDescription};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Link mailbox capacity.
const LINK_CHANNEL_BUFFER: usize = 256;

/// Stand-in deadline when no timer is armed.
const IDLE_TIMER: Duration = Duration::from_secs(3600);

/// Negotiation message a link wants delivered to its remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    RetryRequest,
    RenegotiateRequest,
}

impl PeerSignal {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            PeerSignal::Offer(_) => "offer",
            PeerSignal::Answer(_) => "answer",
            PeerSignal::IceCandidate(_) => "iceCandidate",
            PeerSignal::RetryRequest => "retryRequest",
            PeerSignal::RenegotiateRequest => "renegotiateRequest",
        }
    }
}

/// A signal addressed to one remote connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSignal {
    pub target: ConnectionId,
    pub signal: PeerSignal,
}

impl OutboundSignal {
    /// Wire event asking the hub to relay this signal inside `room_id`.
    #[must_use]
    pub fn into_client_event(self, room_id: RoomId) -> ClientEvent {
        let target = self.target;
        match self.signal {
            PeerSignal::Offer(payload) => ClientEvent::Offer {
                room_id,
                target,
                payload,
            },
            PeerSignal::Answer(payload) => ClientEvent::Answer {
                room_id,
                target,
                payload,
            },
            PeerSignal::IceCandidate(payload) => ClientEvent::IceCandidate {
                room_id,
                target,
                payload,
            },
            PeerSignal::RetryRequest => ClientEvent::RetryRequest { room_id, target },
            PeerSignal::RenegotiateRequest => ClientEvent::RenegotiateRequest { room_id, target },
        }
    }

    /// The event the target receives once the hub relayed it from `sender`.
    #[must_use]
    pub fn into_server_event(self, sender: ConnectionId) -> ServerEvent {
        match self.signal {
            PeerSignal::Offer(payload) => ServerEvent::Offer { sender, payload },
            PeerSignal::Answer(payload) => ServerEvent::Answer { sender, payload },
            PeerSignal::IceCandidate(payload) => ServerEvent::IceCandidate { sender, payload },
            PeerSignal::RetryRequest => ServerEvent::ConnectionRetry { sender },
            PeerSignal::RenegotiateRequest => ServerEvent::RenegotiationRequested { sender },
        }
    }
}

/// Shared wiring every link of a session gets.
#[derive(Clone)]
pub struct LinkContext {
    pub local: ConnectionId,
    pub engine: Arc<dyn MediaEngine>,
    pub capture: watch::Receiver<CaptureState>,
    pub config: PeerConfig,
    pub signals: mpsc::UnboundedSender<OutboundSignal>,
    pub events: broadcast::Sender<PeerStateEvent>,
}

enum LinkMessage {
    RemoteOffer(SessionDescription),
    RemoteAnswer(SessionDescription),
    RemoteCandidate(IceCandidate),
    RetryRequested,
    RenegotiationRequested,
    NegotiationNeeded,
    GetState {
        respond_to: oneshot::Sender<PeerState>,
    },
}

/// Handle to a peer link actor.
#[derive(Clone, Debug)]
pub struct PeerLinkHandle {
    remote: ConnectionId,
    sender: mpsc::Sender<LinkMessage>,
    cancel_token: CancellationToken,
}

impl PeerLinkHandle {
    #[must_use]
    pub fn remote(&self) -> &ConnectionId {
        &self.remote
    }

    async fn post(&self, message: LinkMessage) -> Result<(), PeerError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| PeerError::Closed)
    }

    /// # Errors
    ///
    /// `PeerError::Closed` when the link has stopped.
    pub async fn remote_offer(&self, offer: SessionDescription) -> Result<(), PeerError> {
        self.post(LinkMessage::RemoteOffer(offer)).await
    }

    /// # Errors
    ///
    /// `PeerError::Closed` when the link has stopped.
    pub async fn remote_answer(&self, answer: SessionDescription) -> Result<(), PeerError> {
        self.post(LinkMessage::RemoteAnswer(answer)).await
    }

    /// # Errors
    ///
    /// `PeerError::Closed` when the link has stopped.
    pub async fn remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.post(LinkMessage::RemoteCandidate(candidate)).await
    }

    /// # Errors
    ///
    /// `PeerError::Closed` when the link has stopped.
    pub async fn retry_requested(&self) -> Result<(), PeerError> {
        self.post(LinkMessage::RetryRequested).await
    }

    /// # Errors
    ///
    /// `PeerError::Closed` when the link has stopped.
    pub async fn renegotiation_requested(&self) -> Result<(), PeerError> {
        self.post(LinkMessage::RenegotiationRequested).await
    }

    /// # Errors
    ///
    /// `PeerError::Closed` when the link has stopped.
    pub async fn negotiation_needed(&self) -> Result<(), PeerError> {
        self.post(LinkMessage::NegotiationNeeded).await
    }

    /// Current state of the link.
    ///
    /// # Errors
    ///
    /// `PeerError::Closed` when the link has stopped.
    pub async fn state(&self) -> Result<PeerState, PeerError> {
        let (tx, rx) = oneshot::channel();
        self.post(LinkMessage::GetState { respond_to: tx }).await?;
        rx.await.map_err(|_| PeerError::Closed)
    }

    /// Stop the link; it closes its connection on the way out.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    /// True once the actor has stopped or been told to stop.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.cancel_token.is_cancelled()
    }
}

/// The actor.
pub struct PeerLink {
    local: ConnectionId,
    remote: ConnectionId,
    is_initiator: bool,
    engine: Arc<dyn MediaEngine>,
    capture: watch::Receiver<CaptureState>,
    capture_open: bool,
    config: PeerConfig,
    signals: mpsc::UnboundedSender<OutboundSignal>,
    events: broadcast::Sender<PeerStateEvent>,
    receiver: mpsc::Receiver<LinkMessage>,
    cancel_token: CancellationToken,

    connection: Option<Box<dyn MediaConnection>>,
    media_events: mpsc::UnboundedReceiver<MediaEvent>,
    state: PeerState,
    has_remote_description: bool,
    pending_candidates: Vec<IceCandidate>,
    offer_outstanding: bool,
    /// Re-offer once the outstanding offer is answered.
    reoffer_pending: bool,

    /// Recovery attempts since the last `Connected`.
    retries: u32,
    /// Set by a `Disconnected` report; the next first attempt is in place.
    transport_disconnected: bool,
    negotiation_deadline: Option<Instant>,
    retry_at: Option<Instant>,
    last_recovery: Option<Instant>,
    last_recreate: Option<Instant>,
}

impl PeerLink {
    /// Spawn a link towards `remote`.
    ///
    /// `buffered` holds candidates that arrived before the link existed;
    /// they are applied after the first remote description.
    pub fn spawn(
        ctx: LinkContext,
        remote: ConnectionId,
        buffered: Vec<IceCandidate>,
        cancel_token: CancellationToken,
    ) -> (PeerLinkHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(LINK_CHANNEL_BUFFER);
        // Replaced when the first connection is opened
        let (_, media_events) = mpsc::unbounded_channel();

        let link = Self {
            is_initiator: ctx.local < remote,
            local: ctx.local,
            remote: remote.clone(),
            engine: ctx.engine,
            capture: ctx.capture,
            capture_open: true,
            config: ctx.config,
            signals: ctx.signals,
            events: ctx.events,
            receiver,
            cancel_token: cancel_token.clone(),
            connection: None,
            media_events,
            state: PeerState::New,
            has_remote_description: false,
            pending_candidates: buffered,
            offer_outstanding: false,
            reoffer_pending: false,
            retries: 0,
            transport_disconnected: false,
            negotiation_deadline: None,
            retry_at: None,
            last_recovery: None,
            last_recreate: None,
        };

        let task_handle = tokio::spawn(link.run());

        let handle = PeerLinkHandle {
            remote,
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "client.peer.link",
        fields(local = %self.local, remote = %self.remote, initiator = self.is_initiator)
    )]
    async fn run(mut self) {
        debug!(target: "client.peer", remote = %self.remote, "Peer link started");

        match self.open_connection().await {
            Ok(()) => {
                if self.is_initiator {
                    self.offer(false).await;
                }
                self.negotiation_deadline = Some(Instant::now() + self.config.negotiation_timeout);
            }
            Err(e) => {
                warn!(target: "client.peer", remote = %self.remote, error = %e, "Could not create connection");
                self.schedule_recovery().await;
            }
        }

        while !self.state.is_terminal() {
            let timer = self.next_timer();
            let sleep_until = timer.unwrap_or_else(|| Instant::now() + IDLE_TIMER);

            tokio::select! {
                () = self.cancel_token.cancelled() => break,

                message = self.receiver.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },

                Some(event) = self.media_events.recv() => self.handle_media_event(event).await,

                changed = self.capture.changed(), if self.capture_open => match changed {
                    Ok(()) => self.apply_capture().await,
                    Err(_) => self.capture_open = false,
                },

                () = tokio::time::sleep_until(sleep_until), if timer.is_some() => {
                    self.on_timer().await;
                }
            }
        }

        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        if !self.state.is_terminal() {
            self.set_state(PeerState::Closed);
        }

        debug!(target: "client.peer", remote = %self.remote, state = %self.state, "Peer link stopped");
    }

    async fn handle_message(&mut self, message: LinkMessage) {
        match message {
            LinkMessage::RemoteOffer(offer) => {
                if self.is_initiator && self.offer_outstanding {
                    debug!(target: "client.peer", remote = %self.remote, "Ignoring offer from non-initiator");
                    return;
                }
                if let Err(e) = self.answer(offer).await {
                    warn!(target: "client.peer", remote = %self.remote, error = %e, "Answering offer failed");
                    self.schedule_recovery().await;
                }
            }

            LinkMessage::RemoteAnswer(answer) => {
                if !self.offer_outstanding {
                    debug!(target: "client.peer", remote = %self.remote, "Ignoring answer without outstanding offer");
                    return;
                }
                if let Err(e) = self.accept_answer(answer).await {
                    warn!(target: "client.peer", remote = %self.remote, error = %e, "Applying answer failed");
                    self.schedule_recovery().await;
                }
            }

            LinkMessage::RemoteCandidate(candidate) => {
                match self.connection.as_mut() {
                    Some(connection) if self.has_remote_description => {
                        if let Err(e) = connection.add_ice_candidate(candidate).await {
                            debug!(target: "client.peer", remote = %self.remote, error = %e, "Candidate rejected");
                        }
                    }
                    _ => self.pending_candidates.push(candidate),
                }
            }

            LinkMessage::RetryRequested => {
                let recently_recreated = self
                    .last_recreate
                    .is_some_and(|at| at.elapsed() < self.config.retry_min_spacing);
                if recently_recreated {
                    debug!(target: "client.peer", remote = %self.remote, "Retry request acknowledged");
                    return;
                }
                info!(target: "client.peer", remote = %self.remote, "Remote asked for a fresh connection");
                self.set_state(PeerState::Reconnecting);
                self.recreate(false).await;
            }

            LinkMessage::RenegotiationRequested => {
                if self.is_initiator {
                    debug!(target: "client.peer", remote = %self.remote, "Remote asked for a new offer");
                    self.renegotiate().await;
                } else {
                    debug!(target: "client.peer", remote = %self.remote, "Ignoring renegotiation request as non-initiator");
                }
            }

            LinkMessage::NegotiationNeeded => self.renegotiate().await,

            LinkMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state);
            }
        }
    }

    async fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::LocalCandidate(candidate) => {
                self.signal(PeerSignal::IceCandidate(candidate));
            }
            MediaEvent::Transport(TransportState::Connected) => {
                self.retries = 0;
                self.transport_disconnected = false;
                self.negotiation_deadline = None;
                self.retry_at = None;
                self.set_state(PeerState::Connected);
            }
            MediaEvent::Transport(TransportState::Disconnected) => {
                if self.state == PeerState::Connected {
                    self.set_state(PeerState::Disconnected);
                    self.transport_disconnected = true;
                    self.schedule_recovery().await;
                }
            }
            MediaEvent::Transport(TransportState::Failed) => {
                warn!(target: "client.peer", remote = %self.remote, "Transport failed");
                self.transport_disconnected = false;
                self.schedule_recovery().await;
            }
            MediaEvent::Transport(
                TransportState::New | TransportState::Connecting | TransportState::Closed,
            ) => {}
        }
    }

    async fn apply_capture(&mut self) {
        let capture = *self.capture.borrow_and_update();
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        match connection.apply_capture(capture).await {
            Ok(true) => self.renegotiate().await,
            Ok(false) => {}
            Err(e) => {
                warn!(target: "client.peer", remote = %self.remote, error = %e, "Applying capture state failed");
            }
        }
    }

    /// Capability change: only the initiator offers, and never twice at once.
    /// The non-initiator asks the initiator for an offer once a first round
    /// has completed; before that the pending answer carries the change.
    async fn renegotiate(&mut self) {
        if !self.is_initiator {
            if self.has_remote_description && self.connection.is_some() {
                debug!(target: "client.peer", remote = %self.remote, "Asking initiator for a new offer");
                self.signal(PeerSignal::RenegotiateRequest);
            }
            return;
        }
        if self.connection.is_none() || self.retry_at.is_some() {
            // Recovery renegotiates from scratch
            return;
        }
        if self.offer_outstanding {
            self.reoffer_pending = true;
            return;
        }
        self.offer(false).await;
    }

    async fn open_connection(&mut self) -> Result<(), PeerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut connection = self.engine.create_connection(&self.remote, tx).await?;
        let capture = *self.capture.borrow_and_update();
        connection.apply_capture(capture).await?;
        self.media_events = rx;
        self.connection = Some(connection);
        Ok(())
    }

    /// Create and send an offer; failures schedule recovery.
    async fn offer(&mut self, ice_restart: bool) {
        if let Err(e) = self.try_offer(ice_restart).await {
            warn!(target: "client.peer", remote = %self.remote, error = %e, "Creating offer failed");
            self.schedule_recovery().await;
        }
    }

    async fn try_offer(&mut self, ice_restart: bool) -> Result<(), PeerError> {
        let connection = self.connection.as_mut().ok_or(PeerError::Closed)?;
        let offer = connection.create_offer(ice_restart).await?;
        connection.set_local_description(offer.clone()).await?;
        self.offer_outstanding = true;
        self.signal(PeerSignal::Offer(offer));
        if self.state == PeerState::New {
            self.set_state(PeerState::Negotiating);
        }
        Ok(())
    }

    async fn answer(&mut self, offer: SessionDescription) -> Result<(), PeerError> {
        let connection = self.connection.as_mut().ok_or(PeerError::Closed)?;
        connection.set_remote_description(offer).await?;
        self.has_remote_description = true;
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                debug!(target: "client.peer", remote = %self.remote, error = %e, "Buffered candidate rejected");
            }
        }
        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        self.signal(PeerSignal::Answer(answer));
        if matches!(self.state, PeerState::New | PeerState::Reconnecting) {
            self.set_state(PeerState::Negotiating);
        }
        Ok(())
    }

    async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), PeerError> {
        let connection = self.connection.as_mut().ok_or(PeerError::Closed)?;
        connection.set_remote_description(answer).await?;
        self.offer_outstanding = false;
        self.has_remote_description = true;
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                debug!(target: "client.peer", remote = %self.remote, error = %e, "Buffered candidate rejected");
            }
        }
        if std::mem::take(&mut self.reoffer_pending) {
            self.offer(false).await;
        }
        Ok(())
    }

    fn next_timer(&self) -> Option<Instant> {
        match (self.retry_at, self.negotiation_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        if self.retry_at.is_some_and(|at| at <= now) {
            self.retry_at = None;
            self.recover().await;
        } else if self.negotiation_deadline.is_some_and(|at| at <= now) {
            self.negotiation_deadline = None;
            if self.state != PeerState::Connected {
                warn!(
                    target: "client.peer",
                    remote = %self.remote,
                    state = %self.state,
                    "Negotiation deadline passed"
                );
                self.schedule_recovery().await;
            }
        }
    }

    /// Count a recovery attempt and arm its timer, or fail the link.
    async fn schedule_recovery(&mut self) {
        if self.retry_at.is_some() || self.state.is_terminal() {
            return;
        }

        self.retries += 1;
        if self.retries > self.config.max_retries {
            self.fail().await;
            return;
        }

        let now = Instant::now();
        let mut at = now + self.config.retry_delay(self.retries);
        if let Some(last) = self.last_recovery {
            at = at.max(last + self.config.retry_min_spacing);
        }
        self.retry_at = Some(at);
        self.negotiation_deadline = None;

        info!(
            target: "client.peer",
            remote = %self.remote,
            attempt = self.retries,
            max_retries = self.config.max_retries,
            delay_ms = at.saturating_duration_since(now).as_millis(),
            "Scheduling connection recovery"
        );
        self.set_state(PeerState::Reconnecting);
    }

    async fn recover(&mut self) {
        self.last_recovery = Some(Instant::now());

        if self.transport_disconnected && self.retries == 1 && self.connection.is_some() {
            debug!(target: "client.peer", remote = %self.remote, "Restarting ICE in place");
            if self.is_initiator {
                self.offer_outstanding = false;
                self.offer(true).await;
            }
        } else {
            self.recreate(true).await;
        }

        if self.retry_at.is_none() && !self.state.is_terminal() {
            self.negotiation_deadline = Some(Instant::now() + self.config.negotiation_timeout);
        }
    }

    /// Tear down the connection and start a fresh negotiation round.
    async fn recreate(&mut self, notify_remote: bool) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.has_remote_description = false;
        self.pending_candidates.clear();
        self.offer_outstanding = false;
        self.reoffer_pending = false;
        self.transport_disconnected = false;
        self.last_recreate = Some(Instant::now());

        if let Err(e) = self.open_connection().await {
            warn!(target: "client.peer", remote = %self.remote, error = %e, "Could not recreate connection");
            self.schedule_recovery().await;
            return;
        }

        if notify_remote {
            self.signal(PeerSignal::RetryRequest);
        }
        self.set_state(PeerState::Negotiating);
        if self.is_initiator {
            self.offer(false).await;
        }
        if self.retry_at.is_none() {
            self.negotiation_deadline = Some(Instant::now() + self.config.negotiation_timeout);
        }
    }

    async fn fail(&mut self) {
        warn!(
            target: "client.peer",
            remote = %self.remote,
            retries = self.config.max_retries,
            "Peer connection failed after max retries"
        );
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.retry_at = None;
        self.negotiation_deadline = None;
        self.set_state(PeerState::Failed);
    }

    fn signal(&self, signal: PeerSignal) {
        debug!(target: "client.peer", remote = %self.remote, signal = signal.name(), "Sending signal");
        // The manager is gone when this fails; the link stops on cancellation
        let _ = self.signals.send(OutboundSignal {
            target: self.remote.clone(),
            signal,
        });
    }

    fn set_state(&mut self, next: PeerState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            debug!(
                target: "client.peer",
                remote = %self.remote,
                from = %self.state,
                to = %next,
                "Skipping invalid transition"
            );
            return;
        }

        let from = std::mem::replace(&mut self.state, next);
        info!(
            target: "client.peer",
            remote = %self.remote,
            from = %from,
            to = %next,
            attempt = self.retries,
            "Peer state changed"
        );
        // No UI subscribed is fine
        let _ = self.events.send(PeerStateEvent {
            remote: self.remote.clone(),
            from,
            to: next,
            attempt: self.retries,
        });
    }
}
