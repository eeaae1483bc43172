//! Recording room store for hub tests.
//!
//! Implements `hub_service::store::RoomStore` in memory and records every
//! call, so tests can assert what was persisted and how often. Latency and
//! failures can be injected per operation.
//!
//! # Example
//!
//! ```rust,ignore
//! use hub_test_utils::{MockRoomStore, StoreOp, TestRoom};
//!
//! let store = MockRoomStore::new()
//!     .with_room(TestRoom::new("R1").with_password("p1"))
//!     .with_latency(StoreOp::FetchAuthSnapshot, Duration::from_millis(50))
//!     .failing(StoreOp::AppendMessage);
//!
//! // ... run the hub against `Arc::new(store.clone())` ...
//! assert_eq!(store.document_writes(&RoomId::from("R1")).len(), 1);
//! ```

use async_trait::async_trait;
use common::types::{ChatMessage, DocumentSnapshot, RoomAuthSnapshot, RoomId, UserId};
use hub_service::errors::HubError;
use hub_service::store::RoomStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Store operations, for latency/failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FetchAuthSnapshot,
    PersistParticipant,
    PersistDocumentSnapshot,
    AppendMessage,
    FetchRecentMessages,
}

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    FetchAuthSnapshot(RoomId),
    PersistParticipant(RoomId, UserId),
    PersistDocumentSnapshot(RoomId, DocumentSnapshot),
    AppendMessage(ChatMessage),
    FetchRecentMessages(RoomId, usize),
}

impl StoreCall {
    #[must_use]
    pub fn op(&self) -> StoreOp {
        match self {
            StoreCall::FetchAuthSnapshot(_) => StoreOp::FetchAuthSnapshot,
            StoreCall::PersistParticipant(..) => StoreOp::PersistParticipant,
            StoreCall::PersistDocumentSnapshot(..) => StoreOp::PersistDocumentSnapshot,
            StoreCall::AppendMessage(_) => StoreOp::AppendMessage,
            StoreCall::FetchRecentMessages(..) => StoreOp::FetchRecentMessages,
        }
    }
}

/// Mock room store.
#[derive(Debug, Clone, Default)]
pub struct MockRoomStore {
    inner: Arc<Mutex<MockStoreInner>>,
}

#[derive(Debug, Default)]
struct MockStoreInner {
    rooms: HashMap<RoomId, RoomAuthSnapshot>,
    messages: HashMap<RoomId, Vec<ChatMessage>>,
    calls: Vec<StoreCall>,
    latency: HashMap<StoreOp, Duration>,
    failing: HashSet<StoreOp>,
}

impl MockRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a room.
    #[must_use]
    pub fn with_room(self, room: impl Into<RoomAuthSnapshot>) -> Self {
        self.insert_room(room);
        self
    }

    /// Delay every call of `op` by `latency`.
    #[must_use]
    pub fn with_latency(self, op: StoreOp, latency: Duration) -> Self {
        self.inner.lock().unwrap().latency.insert(op, latency);
        self
    }

    /// Make every call of `op` fail with `HubError::Store`.
    #[must_use]
    pub fn failing(self, op: StoreOp) -> Self {
        self.set_failing(op, true);
        self
    }

    pub fn insert_room(&self, room: impl Into<RoomAuthSnapshot>) {
        let room = room.into();
        self.inner
            .lock()
            .unwrap()
            .rooms
            .insert(room.room_id.clone(), room);
    }

    /// Turn failure injection for `op` on or off.
    pub fn set_failing(&self, op: StoreOp, failing: bool) {
        let mut inner = self.inner.lock().unwrap();
        if failing {
            inner.failing.insert(op);
        } else {
            inner.failing.remove(&op);
        }
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    #[must_use]
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    /// Document snapshots written for `room_id`, in order.
    #[must_use]
    pub fn document_writes(&self, room_id: &RoomId) -> Vec<DocumentSnapshot> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::PersistDocumentSnapshot(id, doc) if id == room_id => Some(doc.clone()),
                _ => None,
            })
            .collect()
    }

    /// Participant appends for `room_id`, in order.
    #[must_use]
    pub fn participant_writes(&self, room_id: &RoomId) -> Vec<UserId> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::PersistParticipant(id, user) if id == room_id => Some(user.clone()),
                _ => None,
            })
            .collect()
    }

    /// Stored chat messages of `room_id`.
    #[must_use]
    pub fn messages(&self, room_id: &RoomId) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Current snapshot of `room_id`, including writes made by the hub.
    #[must_use]
    pub fn room(&self, room_id: &RoomId) -> Option<RoomAuthSnapshot> {
        self.inner.lock().unwrap().rooms.get(room_id).cloned()
    }

    /// Record the call, then apply latency and failure injection.
    async fn enter(&self, call: StoreCall) -> Result<(), HubError> {
        let op = call.op();
        let (latency, failing) = {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(call);
            (inner.latency.get(&op).copied(), inner.failing.contains(&op))
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if failing {
            return Err(HubError::Store(format!("injected {op:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl RoomStore for MockRoomStore {
    async fn fetch_auth_snapshot(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<RoomAuthSnapshot>, HubError> {
        self.enter(StoreCall::FetchAuthSnapshot(room_id.clone()))
            .await?;
        Ok(self.room(room_id))
    }

    async fn persist_participant(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(), HubError> {
        self.enter(StoreCall::PersistParticipant(
            room_id.clone(),
            user_id.clone(),
        ))
        .await?;
        let mut inner = self.inner.lock().unwrap();
        let room = inner
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;
        if !room.participants.contains(user_id) {
            room.participants.push(user_id.clone());
        }
        Ok(())
    }

    async fn persist_document_snapshot(
        &self,
        room_id: &RoomId,
        document: &DocumentSnapshot,
    ) -> Result<(), HubError> {
        self.enter(StoreCall::PersistDocumentSnapshot(
            room_id.clone(),
            document.clone(),
        ))
        .await?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(room) = inner.rooms.get_mut(room_id) {
            room.document = Some(document.clone());
        }
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), HubError> {
        self.enter(StoreCall::AppendMessage(message.clone())).await?;
        self.inner
            .lock()
            .unwrap()
            .messages
            .entry(message.room_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, HubError> {
        self.enter(StoreCall::FetchRecentMessages(room_id.clone(), limit))
            .await?;
        let messages = self.messages(room_id);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }
}
