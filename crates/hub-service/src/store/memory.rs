//! In-memory `RoomStore`, optionally seeded from a JSON file.
//!
//! Used by the standalone binary and by tests. State is lost on restart.
//!
//! # Seed file format
//!
//! ```json
//! [
//!   {
//!     "roomId": "R1",
//!     "ownerId": "U1",
//!     "isPrivate": false,
//!     "password": "p1",
//!     "sharedWith": ["U3"],
//!     "document": { "content": "fn main() {}", "language": "rust" }
//!   }
//! ]
//! ```
//!
//! `password` is hashed with bcrypt at load time; a pre-computed
//! `passwordHash` may be given instead.

use super::RoomStore;
use crate::errors::HubError;

use chrono::{DateTime, Utc};
use common::types::{ChatMessage, DocumentSnapshot, RoomAuthSnapshot, RoomId, UserId};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::info;

/// bcrypt cost used when hashing seed passwords.
const SEED_BCRYPT_COST: u32 = 10;

/// One room entry of the seed file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSeed {
    pub room_id: RoomId,
    pub owner_id: UserId,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub shared_with: Vec<UserId>,
    #[serde(default)]
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub document: Option<DocumentSnapshot>,
}

impl RoomSeed {
    fn into_snapshot(self) -> Result<RoomAuthSnapshot, HubError> {
        let password_hash = match (self.password_hash, self.password) {
            (Some(hash), _) => Some(hash),
            (None, Some(plain)) if !plain.trim().is_empty() => Some(
                bcrypt::hash(plain, SEED_BCRYPT_COST)
                    .map_err(|e| HubError::Config(format!("Password hashing failed: {e}")))?,
            ),
            _ => None,
        };

        Ok(RoomAuthSnapshot {
            room_id: self.room_id,
            is_private: self.is_private,
            password_hash,
            owner_id: self.owner_id,
            participants: self.participants,
            shared_with: self.shared_with,
            document: self.document,
        })
    }
}

#[derive(Debug)]
struct StoredRoom {
    auth: RoomAuthSnapshot,
    messages: Vec<ChatMessage>,
    last_activity: DateTime<Utc>,
}

impl StoredRoom {
    fn new(auth: RoomAuthSnapshot) -> Self {
        Self {
            auth,
            messages: Vec::new(),
            last_activity: Utc::now(),
        }
    }
}

/// Room storage held in process memory.
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, StoredRoom>>,
}

impl MemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given rooms.
    #[must_use]
    pub fn with_rooms(rooms: impl IntoIterator<Item = RoomAuthSnapshot>) -> Self {
        let rooms = rooms
            .into_iter()
            .map(|auth| (auth.room_id.clone(), StoredRoom::new(auth)))
            .collect();
        Self {
            rooms: RwLock::new(rooms),
        }
    }

    /// Load rooms from a JSON seed file.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Config` if the file cannot be read or parsed.
    pub async fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, HubError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| HubError::Config(format!("Cannot read seed file {}: {e}", path.display())))?;
        let store = Self::from_seed_json(&raw)?;

        info!(
            target: "hub.store",
            path = %path.display(),
            rooms = store.rooms.read().await.len(),
            "Loaded room seed file"
        );

        Ok(store)
    }

    /// Parse rooms from seed JSON.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Config` if the JSON is malformed.
    pub fn from_seed_json(raw: &str) -> Result<Self, HubError> {
        let seeds: Vec<RoomSeed> = serde_json::from_str(raw)
            .map_err(|e| HubError::Config(format!("Invalid seed file: {e}")))?;
        let rooms = seeds
            .into_iter()
            .map(RoomSeed::into_snapshot)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_rooms(rooms))
    }

    /// Insert or replace a room.
    pub async fn insert_room(&self, auth: RoomAuthSnapshot) {
        self.rooms
            .write()
            .await
            .insert(auth.room_id.clone(), StoredRoom::new(auth));
    }

    /// Current document snapshot of a room.
    pub async fn document(&self, room_id: &RoomId) -> Option<DocumentSnapshot> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .and_then(|room| room.auth.document.clone())
    }

    /// All stored messages of a room.
    pub async fn messages(&self, room_id: &RoomId) -> Vec<ChatMessage> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.messages.clone())
            .unwrap_or_default()
    }

    /// Last time anything was written to the room.
    pub async fn last_activity(&self, room_id: &RoomId) -> Option<DateTime<Utc>> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.last_activity)
    }
}

#[async_trait::async_trait]
impl RoomStore for MemoryRoomStore {
    async fn fetch_auth_snapshot(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<RoomAuthSnapshot>, HubError> {
        Ok(self
            .rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.auth.clone()))
    }

    async fn persist_participant(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> Result<(), HubError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;

        if !room.auth.participants.contains(user_id) {
            room.auth.participants.push(user_id.clone());
        }
        room.last_activity = Utc::now();
        Ok(())
    }

    async fn persist_document_snapshot(
        &self,
        room_id: &RoomId,
        document: &DocumentSnapshot,
    ) -> Result<(), HubError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;

        room.auth.document = Some(document.clone());
        room.last_activity = Utc::now();
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), HubError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(&message.room_id)
            .ok_or_else(|| HubError::RoomNotFound(message.room_id.to_string()))?;

        room.messages.push(message.clone());
        room.last_activity = Utc::now();
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, HubError> {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return Ok(Vec::new());
        };

        let skip = room.messages.len().saturating_sub(limit);
        Ok(room.messages.iter().skip(skip).cloned().collect())
    }
}
