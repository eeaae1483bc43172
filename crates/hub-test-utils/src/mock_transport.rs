//! Scripted hub transport for Join Orchestrator tests.
//!
//! Authorize calls consume a queue of scripted results (default: granted).
//! Each `joinRoom` consumes a scripted [`JoinReply`] (default: an immediate
//! snapshot) and every sent event is recorded.

use async_trait::async_trait;
use common::protocol::{ClientEvent, ServerEvent};
use common::secret::RoomPassword;
use common::types::{ConnectionId, RoomId, RoomSnapshot};
use room_client::errors::{JoinError, TransportError};
use room_client::transport::{AccessGrant, HubTransport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// How the mock hub answers one `joinRoom`.
#[derive(Debug, Clone)]
pub enum JoinReply {
    /// `roomSnapshot` right away.
    Snapshot,
    /// `roomSnapshot` after a delay.
    SnapshotAfter(Duration),
    /// `joinRejected` with this code.
    Reject(String),
    /// Never answer.
    Silent,
}

/// Mock hub transport.
#[derive(Debug, Clone)]
pub struct MockHubTransport {
    connection_id: ConnectionId,
    inner: Arc<Mutex<TransportInner>>,
    events: broadcast::Sender<ServerEvent>,
}

#[derive(Debug, Default)]
struct TransportInner {
    authorize_results: VecDeque<Result<(), JoinError>>,
    authorize_delay: Option<Duration>,
    authorize_calls: Vec<(RoomId, Option<String>)>,
    join_replies: VecDeque<JoinReply>,
    sent: Vec<ClientEvent>,
    closed: bool,
}

impl MockHubTransport {
    /// Transport whose connection the hub knows as `connection_id`.
    #[must_use]
    pub fn new(connection_id: &str) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            connection_id: ConnectionId::from(connection_id),
            inner: Arc::new(Mutex::new(TransportInner::default())),
            events,
        }
    }

    /// Queue the result of the next authorize call.
    #[must_use]
    pub fn with_authorize_result(self, result: Result<(), JoinError>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .authorize_results
            .push_back(result);
        self
    }

    /// Delay every authorize call.
    #[must_use]
    pub fn with_authorize_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().authorize_delay = Some(delay);
        self
    }

    /// Queue the reply to the next `joinRoom`.
    #[must_use]
    pub fn with_join_reply(self, reply: JoinReply) -> Self {
        self.inner.lock().unwrap().join_replies.push_back(reply);
        self
    }

    /// Make every further send fail as if the socket dropped.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }

    /// Push an event as if the hub sent it.
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// `joinRoom` events sent for `room_id`.
    #[must_use]
    pub fn join_requests(&self, room_id: &RoomId) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, ClientEvent::JoinRoom { room_id: r, .. } if r == room_id))
            .count()
    }

    /// Authorize calls so far, with the plaintext password that was sent.
    #[must_use]
    pub fn authorize_calls(&self) -> Vec<(RoomId, Option<String>)> {
        self.inner.lock().unwrap().authorize_calls.clone()
    }

    fn snapshot(&self, room_id: &RoomId) -> ServerEvent {
        ServerEvent::RoomSnapshot(RoomSnapshot {
            room_id: room_id.clone(),
            connection_id: self.connection_id.clone(),
            participants: Vec::new(),
            count: 1,
            document: None,
            recent_messages: Vec::new(),
        })
    }
}

#[async_trait]
impl HubTransport for MockHubTransport {
    async fn authorize(
        &self,
        room_id: &RoomId,
        password: Option<&RoomPassword>,
    ) -> Result<AccessGrant, JoinError> {
        let (delay, result) = {
            let mut inner = self.inner.lock().unwrap();
            inner.authorize_calls.push((
                room_id.clone(),
                password.map(|p| p.expose_secret().to_string()),
            ));
            (
                inner.authorize_delay,
                inner.authorize_results.pop_front().unwrap_or(Ok(())),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result.map(|()| AccessGrant {
            room_id: room_id.clone(),
            access: "public".to_string(),
        })
    }

    async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        let reply = {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(TransportError::Closed);
            }
            inner.sent.push(event.clone());
            match &event {
                ClientEvent::JoinRoom { .. } => {
                    Some(inner.join_replies.pop_front().unwrap_or(JoinReply::Snapshot))
                }
                _ => None,
            }
        };

        let (Some(reply), ClientEvent::JoinRoom { room_id, .. }) = (reply, event) else {
            return Ok(());
        };
        match reply {
            JoinReply::Snapshot => self.emit(self.snapshot(&room_id)),
            JoinReply::SnapshotAfter(delay) => {
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.emit(this.snapshot(&room_id));
                });
            }
            JoinReply::Reject(code) => self.emit(ServerEvent::JoinRejected {
                room_id,
                code,
                message: "rejected".to_string(),
            }),
            JoinReply::Silent => {}
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }
}
