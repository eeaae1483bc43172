//! Mock media engine for peer link tests.
//!
//! Records every call the links make, lets tests push transport state
//! changes into a connection, and can auto-connect once both descriptions
//! are applied.
//!
//! # Example
//!
//! ```rust,ignore
//! use hub_test_utils::MockMediaEngine;
//!
//! let engine = MockMediaEngine::new().with_auto_connect().with_local_candidates(2);
//! // ... spawn a PeerManager with `Arc::new(engine.clone())` ...
//! engine.set_transport_state(&remote, TransportState::Disconnected);
//! assert_eq!(engine.connections_created(&remote), 2);
//! ```

use async_trait::async_trait;
use common::types::{ConnectionId, IceCandidate, SdpKind, SessionDescription};
use room_client::errors::PeerError;
use room_client::peer::{CaptureState, MediaConnection, MediaEngine, MediaEvent, TransportState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One recorded media call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    Create,
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    ApplyCapture(CaptureState),
    Close,
}

/// Mock media engine.
#[derive(Debug, Clone, Default)]
pub struct MockMediaEngine {
    inner: Arc<Mutex<EngineInner>>,
}

#[derive(Debug, Default)]
struct EngineInner {
    auto_connect: bool,
    local_candidates: usize,
    renegotiate_on_capture: bool,
    fail_creates: u32,
    next_sdp: u64,
    /// Calls per remote, in order.
    calls: HashMap<ConnectionId, Vec<MediaCall>>,
    /// Event channel of the newest connection per remote.
    senders: HashMap<ConnectionId, mpsc::UnboundedSender<MediaEvent>>,
    open: HashMap<ConnectionId, usize>,
}

impl MockMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `Connected` once a connection has both descriptions.
    #[must_use]
    pub fn with_auto_connect(self) -> Self {
        self.inner.lock().unwrap().auto_connect = true;
        self
    }

    /// Emit `count` local candidates after every local description.
    #[must_use]
    pub fn with_local_candidates(self, count: usize) -> Self {
        self.inner.lock().unwrap().local_candidates = count;
        self
    }

    /// Ask for renegotiation whenever capture state is applied to a
    /// connection that already has descriptions.
    #[must_use]
    pub fn with_renegotiation_on_capture(self) -> Self {
        self.inner.lock().unwrap().renegotiate_on_capture = true;
        self
    }

    /// Fail the next `count` connection creations.
    pub fn fail_next_creates(&self, count: u32) {
        self.inner.lock().unwrap().fail_creates = count;
    }

    /// Push a transport state into the newest connection towards `remote`.
    ///
    /// Returns false when there is no such connection.
    pub fn set_transport_state(&self, remote: &ConnectionId, state: TransportState) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .senders
            .get(remote)
            .is_some_and(|tx| tx.send(MediaEvent::Transport(state)).is_ok())
    }

    /// Calls made on connections towards `remote`, in order.
    #[must_use]
    pub fn calls(&self, remote: &ConnectionId) -> Vec<MediaCall> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(remote)
            .cloned()
            .unwrap_or_default()
    }

    fn count(&self, remote: &ConnectionId, matches: impl Fn(&MediaCall) -> bool) -> usize {
        self.calls(remote).iter().filter(|c| matches(c)).count()
    }

    #[must_use]
    pub fn connections_created(&self, remote: &ConnectionId) -> usize {
        self.count(remote, |c| matches!(c, MediaCall::Create))
    }

    /// `ice_restart` flag of every offer created towards `remote`.
    #[must_use]
    pub fn offers(&self, remote: &ConnectionId) -> Vec<bool> {
        self.calls(remote)
            .into_iter()
            .filter_map(|c| match c {
                MediaCall::CreateOffer { ice_restart } => Some(ice_restart),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn answers(&self, remote: &ConnectionId) -> usize {
        self.count(remote, |c| matches!(c, MediaCall::CreateAnswer))
    }

    /// Candidates successfully added towards `remote`, in order.
    #[must_use]
    pub fn candidates_added(&self, remote: &ConnectionId) -> Vec<String> {
        self.calls(remote)
            .into_iter()
            .filter_map(|c| match c {
                MediaCall::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn closed(&self, remote: &ConnectionId) -> usize {
        self.count(remote, |c| matches!(c, MediaCall::Close))
    }

    /// Connections towards `remote` that are not closed.
    #[must_use]
    pub fn open_connections(&self, remote: &ConnectionId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .open
            .get(remote)
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, remote: &ConnectionId, call: MediaCall) {
        self.inner
            .lock()
            .unwrap()
            .calls
            .entry(remote.clone())
            .or_default()
            .push(call);
    }

    fn next_sdp(&self, kind: &str, remote: &ConnectionId) -> String {
        let mut inner = self.inner.lock().unwrap();
        inner.next_sdp += 1;
        format!("{kind}:{remote}:{}", inner.next_sdp)
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_connection(
        &self,
        remote: &ConnectionId,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Box<dyn MediaConnection>, PeerError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_creates > 0 {
                inner.fail_creates -= 1;
                return Err(PeerError::Media("injected create failure".to_string()));
            }
            inner.senders.insert(remote.clone(), events.clone());
            *inner.open.entry(remote.clone()).or_default() += 1;
        }
        self.record(remote, MediaCall::Create);

        Ok(Box::new(MockMediaConnection {
            engine: self.clone(),
            remote: remote.clone(),
            events,
            has_local: false,
            has_remote: false,
            closed: false,
        }))
    }
}

struct MockMediaConnection {
    engine: MockMediaEngine,
    remote: ConnectionId,
    events: mpsc::UnboundedSender<MediaEvent>,
    has_local: bool,
    has_remote: bool,
    closed: bool,
}

impl MockMediaConnection {
    fn check_open(&self) -> Result<(), PeerError> {
        if self.closed {
            return Err(PeerError::Negotiation("connection closed".to_string()));
        }
        Ok(())
    }

    fn maybe_connect(&self) {
        let auto_connect = self.engine.inner.lock().unwrap().auto_connect;
        if auto_connect && self.has_local && self.has_remote {
            let _ = self
                .events
                .send(MediaEvent::Transport(TransportState::Connected));
        }
    }
}

#[async_trait]
impl MediaConnection for MockMediaConnection {
    async fn create_offer(&mut self, ice_restart: bool) -> Result<SessionDescription, PeerError> {
        self.check_open()?;
        self.engine
            .record(&self.remote, MediaCall::CreateOffer { ice_restart });
        Ok(SessionDescription::offer(
            self.engine.next_sdp("offer", &self.remote),
        ))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, PeerError> {
        self.check_open()?;
        if !self.has_remote {
            return Err(PeerError::Negotiation("answer without remote offer".to_string()));
        }
        self.engine.record(&self.remote, MediaCall::CreateAnswer);
        Ok(SessionDescription::answer(
            self.engine.next_sdp("answer", &self.remote),
        ))
    }

    async fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), PeerError> {
        self.check_open()?;
        self.engine
            .record(&self.remote, MediaCall::SetLocal(desc.kind));
        self.has_local = true;

        let count = self.engine.inner.lock().unwrap().local_candidates;
        for i in 0..count {
            let _ = self.events.send(MediaEvent::LocalCandidate(IceCandidate::new(
                format!("candidate:{}:{i}", desc.sdp),
            )));
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), PeerError> {
        self.check_open()?;
        self.engine
            .record(&self.remote, MediaCall::SetRemote(desc.kind));
        self.has_remote = true;
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.check_open()?;
        if !self.has_remote {
            return Err(PeerError::Negotiation(
                "candidate before remote description".to_string(),
            ));
        }
        self.engine
            .record(&self.remote, MediaCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn apply_capture(&mut self, capture: CaptureState) -> Result<bool, PeerError> {
        self.check_open()?;
        self.engine
            .record(&self.remote, MediaCall::ApplyCapture(capture));
        let renegotiate = self.engine.inner.lock().unwrap().renegotiate_on_capture;
        Ok(renegotiate && self.has_local && self.has_remote)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.engine.record(&self.remote, MediaCall::Close);
        let mut inner = self.engine.inner.lock().unwrap();
        if let Some(open) = inner.open.get_mut(&self.remote) {
            *open = open.saturating_sub(1);
        }
        if inner
            .senders
            .get(&self.remote)
            .is_some_and(|tx| tx.same_channel(&self.events))
        {
            inner.senders.remove(&self.remote);
        }
    }
}
