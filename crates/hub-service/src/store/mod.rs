//! Persistence collaborator seam.
//!
//! The hub never owns durable room state. It reads one authorization
//! snapshot per join, appends participants and chat messages, and writes
//! the debounced document snapshot. Everything goes through [`RoomStore`],
//! which lets the in-memory implementation and test mocks stand in for a
//! real database.

pub mod memory;

pub use memory::MemoryRoomStore;

use crate::errors::HubError;
use crate::observability::metrics;

use common::types::{ChatMessage, DocumentSnapshot, RoomAuthSnapshot, RoomId, UserId};
use std::future::Future;
use std::time::{Duration, Instant};

/// Operations the hub needs from room storage.
#[async_trait::async_trait]
pub trait RoomStore: Send + Sync {
    /// Read the authorization-relevant fields of a room as one snapshot.
    ///
    /// Returns `Ok(None)` when the room does not exist.
    async fn fetch_auth_snapshot(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<RoomAuthSnapshot>, HubError>;

    /// Append a user to the room's historical participant list.
    async fn persist_participant(&self, room_id: &RoomId, user_id: &UserId)
        -> Result<(), HubError>;

    /// Replace the room's document snapshot.
    async fn persist_document_snapshot(
        &self,
        room_id: &RoomId,
        document: &DocumentSnapshot,
    ) -> Result<(), HubError>;

    /// Append a chat message.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), HubError>;

    /// Most recent messages of a room, oldest first.
    async fn fetch_recent_messages(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, HubError>;
}

/// Run a store call with a deadline and record its latency.
///
/// A call that exceeds `timeout` resolves to `HubError::StoreTimeout`.
pub async fn timed<T, F>(operation: &'static str, timeout: Duration, call: F) -> Result<T, HubError>
where
    F: Future<Output = Result<T, HubError>>,
{
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, call).await;
    metrics::record_store_latency(operation, start.elapsed());

    match result {
        Ok(inner) => inner,
        Err(_) => {
            tracing::warn!(
                target: "hub.store",
                operation,
                timeout_ms = timeout.as_millis(),
                "Store call timed out"
            );
            Err(HubError::StoreTimeout(operation.to_string()))
        }
    }
}
