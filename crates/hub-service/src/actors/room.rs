//! `RoomActor` - one per active room.
//!
//! Owns everything live about a room: presence, the handles of registered
//! connections, the set of users admitted in this process, and the latest
//! document. All of it is mutated only inside the message loop.
//!
//! Every event published into the room passes through this actor's single
//! mailbox and then through each receiver's connection mailbox, so all
//! connections observe room events in publish order.
//!
//! # Join sequence
//!
//! 1. Read one `RoomAuthSnapshot` and evaluate access against it
//! 2. Persist the user as a participant (once per user)
//! 3. Fetch recent chat messages
//! 4. Re-check that the connection is still open
//! 5. Register in presence, deliver `roomSnapshot`, announce if first tab
//!
//! All awaits happen before presence is touched.

use crate::access;
use crate::errors::HubError;
use crate::observability::metrics;
use crate::presence::{PresenceRegistry, Unregistration};
use crate::signaling::{self, RelayDecision, Signal};
use crate::store::{timed, RoomStore};
use crate::sync::DocumentWriterHandle;

use super::connection::ConnectionActorHandle;
use super::messages::{ControllerMessage, RoomMessage, RoomState, RoomUpdate};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use chrono::Utc;
use common::protocol::ServerEvent;
use common::secret::RoomPassword;
use common::types::{
    ChatMessage, ConnectionId, CursorPosition, DocumentSnapshot, MessageKind, RoomId,
    RoomSnapshot, UserId, UserProfile,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Per-room limits taken from the hub configuration.
#[derive(Debug, Clone, Copy)]
pub struct RoomSettings {
    pub recent_message_limit: usize,
    pub max_message_length: usize,
    pub store_timeout: Duration,
}

/// Collaborators shared by every room actor.
#[derive(Clone)]
pub struct RoomDeps {
    pub store: Arc<dyn RoomStore>,
    pub writer: DocumentWriterHandle,
    pub settings: RoomSettings,
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Queue a join and return the receiver for its result.
    ///
    /// The controller uses this to keep its own loop free while the room
    /// talks to the store.
    pub async fn request_join(
        &self,
        connection: ConnectionActorHandle,
        profile: UserProfile,
        password: Option<RoomPassword>,
    ) -> Result<oneshot::Receiver<Result<RoomSnapshot, HubError>>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                connection,
                profile,
                password,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;
        Ok(rx)
    }

    /// Join and wait for the result.
    pub async fn join(
        &self,
        connection: ConnectionActorHandle,
        profile: UserProfile,
        password: Option<RoomPassword>,
    ) -> Result<RoomSnapshot, HubError> {
        self.request_join(connection, profile, password)
            .await?
            .await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn leave(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.sender
            .send(RoomMessage::Leave { connection_id })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn publish(
        &self,
        connection_id: ConnectionId,
        update: RoomUpdate,
    ) -> Result<(), HubError> {
        self.sender
            .send(RoomMessage::Publish {
                connection_id,
                update,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn signal(
        &self,
        sender: ConnectionId,
        target: ConnectionId,
        signal: Signal,
    ) -> Result<(), HubError> {
        self.sender
            .send(RoomMessage::Signal {
                sender,
                target,
                signal,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn get_state(&self) -> Result<RoomState, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Child of the controller's token.
    cancel_token: CancellationToken,
    controller: mpsc::Sender<ControllerMessage>,
    deps: RoomDeps,
    presence: PresenceRegistry,
    connections: HashMap<ConnectionId, ConnectionActorHandle>,
    /// Users this actor admitted and persisted as participants.
    admitted: HashSet<UserId>,
    document: Option<DocumentSnapshot>,
    joins_seen: u64,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: RoomId,
        deps: RoomDeps,
        controller: mpsc::Sender<ControllerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            controller,
            deps,
            presence: PresenceRegistry::new(),
            connections: HashMap::new(),
            admitted: HashSet::new(),
            document: None,
            joins_seen: 0,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "hub.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "hub.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        // An earlier actor for this room may still be writing its document
        if let Err(e) = self.deps.writer.flush(self.room_id.clone()).await {
            warn!(
                target: "hub.actor.room",
                room_id = %self.room_id,
                error = %e,
                "Could not flush predecessor document"
            );
        }

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "hub.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            debug!(
                                target: "hub.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.deps.writer.flush(self.room_id.clone()).await {
            warn!(
                target: "hub.actor.room",
                room_id = %self.room_id,
                error = %e,
                "Could not flush pending document"
            );
        }

        info!(
            target: "hub.actor.room",
            room_id = %self.room_id,
            connections_remaining = self.connections.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                connection,
                profile,
                password,
                respond_to,
            } => {
                let result = self.handle_join(connection, profile, password).await;
                match &result {
                    Ok(_) => metrics::record_join("granted"),
                    Err(e) => {
                        metrics::record_join(&e.error_code().to_ascii_lowercase());
                        if self.presence.is_empty() {
                            self.notify_empty();
                        }
                    }
                }
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave { connection_id } => self.handle_leave(&connection_id),

            RoomMessage::Publish {
                connection_id,
                update,
            } => self.handle_publish(&connection_id, update).await,

            RoomMessage::Signal {
                sender,
                target,
                signal,
            } => self.handle_signal(&sender, &target, signal),

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(RoomState {
                    room_id: self.room_id.clone(),
                    participants: self.presence.participants(),
                    connection_count: self.presence.connection_count(),
                    joins_seen: self.joins_seen,
                    document: self.document.clone(),
                });
            }
        }
    }

    async fn handle_join(
        &mut self,
        connection: ConnectionActorHandle,
        profile: UserProfile,
        password: Option<RoomPassword>,
    ) -> Result<RoomSnapshot, HubError> {
        self.joins_seen += 1;
        let connection_id = connection.connection_id().clone();
        let user_id = profile.user_id.clone();
        let timeout = self.deps.settings.store_timeout;

        if self.presence.contains_connection(&connection_id) {
            debug!(
                target: "hub.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                "Connection already registered, resending snapshot"
            );
            let recent = self.recent_messages().await;
            let snapshot = self.snapshot_for(connection_id, recent);
            connection.deliver(ServerEvent::RoomSnapshot(snapshot.clone()))?;
            return Ok(snapshot);
        }

        let auth = timed(
            "fetch_auth_snapshot",
            timeout,
            self.deps.store.fetch_auth_snapshot(&self.room_id),
        )
        .await?
        .ok_or_else(|| HubError::RoomNotFound(self.room_id.to_string()))?;

        let already_admitted = self.admitted.contains(&user_id);
        let grant = access::evaluate(&auth, &user_id, password.as_ref(), already_admitted)?;

        if !already_admitted && !auth.participants.contains(&user_id) {
            timed(
                "persist_participant",
                timeout,
                self.deps.store.persist_participant(&self.room_id, &user_id),
            )
            .await?;
        }
        self.admitted.insert(user_id.clone());

        if self.document.is_none() {
            self.document = auth.document;
        }

        let recent = self.recent_messages().await;

        if connection.is_closed() {
            debug!(
                target: "hub.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                "Connection closed while joining"
            );
            return Err(HubError::NotInRoom(
                "connection closed during join".to_string(),
            ));
        }

        let first_connection = self.presence.register(connection_id.clone(), profile);
        self.connections
            .insert(connection_id.clone(), connection.clone());

        let snapshot = self.snapshot_for(connection_id.clone(), recent);
        connection.deliver(ServerEvent::RoomSnapshot(snapshot.clone()))?;

        if first_connection {
            if let Some(user) = self.presence.participant(&user_id) {
                let participants = self.presence.participants();
                self.broadcast(
                    &ServerEvent::UserJoined {
                        room_id: self.room_id.clone(),
                        user,
                        participants: participants.clone(),
                    },
                    Some(&connection_id),
                );
                self.broadcast(
                    &ServerEvent::PresenceChanged {
                        room_id: self.room_id.clone(),
                        count: participants.len(),
                        participants,
                    },
                    Some(&connection_id),
                );
            }
        }

        info!(
            target: "hub.actor.room",
            room_id = %self.room_id,
            user_id = %user_id,
            connection_id = %connection_id,
            grant = grant.as_str(),
            first_connection,
            present = self.presence.count(),
            "Connection joined room"
        );

        Ok(snapshot)
    }

    fn handle_leave(&mut self, connection_id: &ConnectionId) {
        self.connections.remove(connection_id);

        match self.presence.unregister(connection_id) {
            Unregistration::LastConnection(user) => {
                info!(
                    target: "hub.actor.room",
                    room_id = %self.room_id,
                    user_id = %user.user_id(),
                    connection_id = %connection_id,
                    "User left room"
                );
                let participants = self.presence.participants();
                self.broadcast(
                    &ServerEvent::UserLeft {
                        room_id: self.room_id.clone(),
                        user,
                        participants: participants.clone(),
                    },
                    None,
                );
                self.broadcast(
                    &ServerEvent::PresenceChanged {
                        room_id: self.room_id.clone(),
                        count: participants.len(),
                        participants,
                    },
                    None,
                );
            }
            Unregistration::StillPresent => {
                debug!(
                    target: "hub.actor.room",
                    room_id = %self.room_id,
                    connection_id = %connection_id,
                    "Connection left, user still present"
                );
            }
            Unregistration::NotRegistered => {}
        }

        if self.presence.is_empty() {
            self.notify_empty();
        }
    }

    async fn handle_publish(&mut self, connection_id: &ConnectionId, update: RoomUpdate) {
        let Some(user_id) = self.presence.user_of(connection_id).cloned() else {
            warn!(
                target: "hub.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                "Update from unregistered connection dropped"
            );
            return;
        };

        match update {
            RoomUpdate::Document { delta, language } => {
                self.publish_document(connection_id, user_id, delta, language)
                    .await;
            }
            RoomUpdate::Cursor { position } => {
                self.publish_cursor(connection_id, user_id, position);
            }
            RoomUpdate::Chat { content, kind } => {
                self.publish_chat(connection_id, user_id, &content, kind)
                    .await;
            }
        }
    }

    async fn publish_document(
        &mut self,
        connection_id: &ConnectionId,
        sender: UserId,
        delta: String,
        language: String,
    ) {
        self.broadcast(
            &ServerEvent::DocumentUpdate {
                room_id: self.room_id.clone(),
                delta: delta.clone(),
                language: language.clone(),
                sender,
            },
            Some(connection_id),
        );

        let document = DocumentSnapshot {
            content: delta,
            language,
        };
        self.document = Some(document.clone());

        if let Err(e) = self
            .deps
            .writer
            .schedule(self.room_id.clone(), document)
            .await
        {
            warn!(
                target: "hub.sync",
                room_id = %self.room_id,
                error = %e,
                "Could not schedule document write"
            );
        }
    }

    fn publish_cursor(
        &self,
        connection_id: &ConnectionId,
        user_id: UserId,
        position: CursorPosition,
    ) {
        self.broadcast(
            &ServerEvent::CursorUpdate {
                room_id: self.room_id.clone(),
                user_id,
                position,
            },
            Some(connection_id),
        );
    }

    async fn publish_chat(
        &self,
        connection_id: &ConnectionId,
        sender_id: UserId,
        content: &str,
        kind: MessageKind,
    ) {
        let content = content.trim();
        let max = self.deps.settings.max_message_length;

        let rejection = if content.is_empty() {
            Some(HubError::BadRequest("Message is empty".to_string()))
        } else if content.chars().count() > max {
            Some(HubError::BadRequest(format!(
                "Message exceeds {max} characters"
            )))
        } else {
            None
        };
        if let Some(e) = rejection {
            self.send_error(connection_id, &e);
            return;
        }

        let message = ChatMessage {
            room_id: self.room_id.clone(),
            sender_id,
            content: content.to_string(),
            kind,
            created_at: Utc::now(),
        };

        let appended = timed(
            "append_message",
            self.deps.settings.store_timeout,
            self.deps.store.append_message(&message),
        )
        .await;

        match appended {
            Ok(()) => {
                metrics::record_message();
                self.broadcast(&ServerEvent::NewMessage(message), None);
            }
            Err(e) => {
                warn!(
                    target: "hub.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "Chat message not stored"
                );
                self.send_error(connection_id, &e);
            }
        }
    }

    fn handle_signal(&self, sender: &ConnectionId, target: &ConnectionId, signal: Signal) {
        let kind = signal.kind();

        match signaling::route(&self.presence, sender, target) {
            RelayDecision::Forward => {
                let delivered = self
                    .connections
                    .get(target)
                    .map(|handle| handle.deliver(signal.into_event(sender.clone())));

                match delivered {
                    Some(Ok(())) => metrics::record_signal_relayed(kind.as_str()),
                    _ => {
                        debug!(
                            target: "hub.relay",
                            room_id = %self.room_id,
                            target = %target,
                            kind = kind.as_str(),
                            "Relay target unreachable"
                        );
                        metrics::record_relay_failure(kind.as_str());
                    }
                }
            }
            RelayDecision::TargetNotInRoom | RelayDecision::SelfTarget => {
                debug!(
                    target: "hub.relay",
                    room_id = %self.room_id,
                    sender = %sender,
                    target = %target,
                    kind = kind.as_str(),
                    "Relay target not in room, dropped"
                );
                metrics::record_relay_failure(kind.as_str());
            }
            RelayDecision::SenderNotInRoom => {
                warn!(
                    target: "hub.relay",
                    room_id = %self.room_id,
                    sender = %sender,
                    kind = kind.as_str(),
                    "Relay from connection outside room rejected"
                );
                metrics::record_relay_failure(kind.as_str());
            }
        }
    }

    async fn recent_messages(&self) -> Vec<ChatMessage> {
        let result = timed(
            "fetch_recent_messages",
            self.deps.settings.store_timeout,
            self.deps
                .store
                .fetch_recent_messages(&self.room_id, self.deps.settings.recent_message_limit),
        )
        .await;

        result.unwrap_or_else(|e| {
            warn!(
                target: "hub.actor.room",
                room_id = %self.room_id,
                error = %e,
                "Recent messages unavailable, joining without history"
            );
            Vec::new()
        })
    }

    fn snapshot_for(
        &self,
        connection_id: ConnectionId,
        recent_messages: Vec<ChatMessage>,
    ) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            connection_id,
            participants: self.presence.participants(),
            count: self.presence.count(),
            document: self.document.clone(),
            recent_messages,
        }
    }

    /// Deliver to every registered connection except `except`.
    fn broadcast(&self, event: &ServerEvent, except: Option<&ConnectionId>) {
        for (connection_id, handle) in &self.connections {
            if Some(connection_id) == except {
                continue;
            }
            if let Err(e) = handle.deliver(event.clone()) {
                debug!(
                    target: "hub.actor.room",
                    room_id = %self.room_id,
                    connection_id = %connection_id,
                    event = event.name(),
                    error = %e,
                    "Broadcast to connection failed"
                );
            }
        }
    }

    fn send_error(&self, connection_id: &ConnectionId, error: &HubError) {
        if let Some(handle) = self.connections.get(connection_id) {
            let _ = handle.deliver(ServerEvent::Error {
                code: error.error_code().to_string(),
                message: error.client_message(),
            });
        }
    }

    fn notify_empty(&self) {
        let message = ControllerMessage::RoomEmpty {
            room_id: self.room_id.clone(),
            joins_seen: self.joins_seen,
        };
        // The controller may be blocked sending to us; never wait on it here.
        if let Err(e) = self.controller.try_send(message) {
            debug!(
                target: "hub.actor.room",
                room_id = %self.room_id,
                error = %e,
                "Could not report empty room"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::{ChannelSink, ConnectionActor};
    use crate::store::MemoryRoomStore;
    use crate::sync::DocumentWriter;
    use common::types::RoomAuthSnapshot;

    struct Fixture {
        room: RoomActorHandle,
        store: Arc<MemoryRoomStore>,
        controller_rx: mpsc::Receiver<ControllerMessage>,
        token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    }

    fn settings() -> RoomSettings {
        RoomSettings {
            recent_message_limit: 50,
            max_message_length: 20,
            store_timeout: Duration::from_secs(1),
        }
    }

    fn fixture(password: Option<&str>) -> Fixture {
        let store = Arc::new(MemoryRoomStore::with_rooms([RoomAuthSnapshot {
            room_id: RoomId::from("R1"),
            is_private: false,
            password_hash: password.map(|p| bcrypt::hash(p, 4).unwrap()),
            owner_id: UserId::from("U1"),
            participants: Vec::new(),
            shared_with: Vec::new(),
            document: None,
        }]));
        let token = CancellationToken::new();
        let (writer, _) = DocumentWriter::spawn(
            Arc::clone(&store) as Arc<dyn RoomStore>,
            Duration::from_secs(2),
            Duration::from_secs(1),
            token.clone(),
        );
        let (controller_tx, controller_rx) = mpsc::channel(16);
        let metrics = ActorMetrics::new();
        let deps = RoomDeps {
            store: Arc::clone(&store) as Arc<dyn RoomStore>,
            writer,
            settings: settings(),
        };
        let (room, _) = RoomActor::spawn(
            RoomId::from("R1"),
            deps,
            controller_tx,
            token.child_token(),
            Arc::clone(&metrics),
        );
        Fixture {
            room,
            store,
            controller_rx,
            token,
            metrics,
        }
    }

    fn connect(
        f: &Fixture,
        conn: &str,
        user: &str,
    ) -> (ConnectionActorHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sink, rx) = ChannelSink::new();
        let (handle, _) = ConnectionActor::spawn(
            ConnectionId::from(conn),
            UserId::from(user),
            Box::new(sink),
            f.token.child_token(),
            Arc::clone(&f.metrics),
        );
        (handle, rx)
    }

    fn profile(user: &str) -> UserProfile {
        UserProfile::anonymous(UserId::from(user))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_join_delivers_snapshot_first() {
        let f = fixture(None);
        let (c1, mut rx1) = connect(&f, "c1", "U1");

        let snapshot = f.room.join(c1, profile("U1"), None).await.unwrap();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.connection_id, ConnectionId::from("c1"));

        assert_eq!(next_event(&mut rx1).await, ServerEvent::RoomSnapshot(snapshot));
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_password_room_scenario() {
        let f = fixture(Some("p1"));
        let (c1, mut rx1) = connect(&f, "c1", "U1");
        let (c2, mut rx2) = connect(&f, "c2", "U2");

        f.room.join(c1, profile("U1"), None).await.unwrap();
        let _ = next_event(&mut rx1).await;

        let result = f.room.join(c2.clone(), profile("U2"), None).await;
        assert!(matches!(result, Err(HubError::PasswordRequired)));

        let result = f
            .room
            .join(c2.clone(), profile("U2"), Some(RoomPassword::from("wrong")))
            .await;
        assert!(matches!(result, Err(HubError::InvalidPassword)));

        let snapshot = f
            .room
            .join(c2, profile("U2"), Some(RoomPassword::from("p1")))
            .await
            .unwrap();
        assert_eq!(snapshot.count, 2);
        assert!(matches!(next_event(&mut rx2).await, ServerEvent::RoomSnapshot(_)));

        match next_event(&mut rx1).await {
            ServerEvent::UserJoined { user, participants, .. } => {
                assert_eq!(user.user_id(), &UserId::from("U2"));
                assert_eq!(participants.len(), 2);
            }
            other => unreachable!("expected userJoined, got {other:?}"),
        }
        match next_event(&mut rx1).await {
            ServerEvent::PresenceChanged { count, .. } => assert_eq!(count, 2),
            other => unreachable!("expected presenceChanged, got {other:?}"),
        }

        let stored = f
            .store
            .fetch_auth_snapshot(&RoomId::from("R1"))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.participants.contains(&UserId::from("U2")));
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_second_tab_is_silent_and_user_left_once() {
        let f = fixture(None);
        let (c1, mut rx1) = connect(&f, "c1", "U1");
        let (c2a, _rx2a) = connect(&f, "c2a", "U2");
        let (c2b, _rx2b) = connect(&f, "c2b", "U2");

        f.room.join(c1.clone(), profile("U1"), None).await.unwrap();
        let _ = next_event(&mut rx1).await;

        f.room.join(c2a, profile("U2"), None).await.unwrap();
        assert!(matches!(next_event(&mut rx1).await, ServerEvent::UserJoined { .. }));
        assert!(matches!(next_event(&mut rx1).await, ServerEvent::PresenceChanged { .. }));

        let snapshot = f.room.join(c2b, profile("U2"), None).await.unwrap();
        assert_eq!(snapshot.count, 2);

        f.room.leave(ConnectionId::from("c2a")).await.unwrap();
        let state = f.room.get_state().await.unwrap();
        assert_eq!(state.participants.len(), 2);
        // A ping is answered after everything queued before it was written.
        c1.ping().await.unwrap();
        assert!(rx1.try_recv().is_err());

        f.room.leave(ConnectionId::from("c2b")).await.unwrap();
        match next_event(&mut rx1).await {
            ServerEvent::UserLeft { user, participants, .. } => {
                assert_eq!(user.user_id(), &UserId::from("U2"));
                assert_eq!(participants.len(), 1);
            }
            other => unreachable!("expected userLeft, got {other:?}"),
        }
        match next_event(&mut rx1).await {
            ServerEvent::PresenceChanged { count, .. } => assert_eq!(count, 1),
            other => unreachable!("expected presenceChanged, got {other:?}"),
        }
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_participant_persisted_once_for_concurrent_tabs() {
        let f = fixture(None);
        let (a, _ra) = connect(&f, "a", "U2");
        let (b, _rb) = connect(&f, "b", "U2");

        let (ja, jb) = tokio::join!(
            f.room.join(a, profile("U2"), None),
            f.room.join(b, profile("U2"), None)
        );
        ja.unwrap();
        jb.unwrap();

        let stored = f
            .store
            .fetch_auth_snapshot(&RoomId::from("R1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.participants, vec![UserId::from("U2")]);
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_signal_reaches_only_target() {
        let f = fixture(None);
        let (a, mut ra) = connect(&f, "a", "U1");
        let (b, mut rb) = connect(&f, "b", "U2");
        let (c, mut rc) = connect(&f, "c", "U3");
        let handles = [a, b, c];
        for (h, u) in handles.iter().zip(["U1", "U2", "U3"]) {
            f.room.join(h.clone(), profile(u), None).await.unwrap();
        }
        for h in &handles {
            h.ping().await.unwrap();
        }
        while ra.try_recv().is_ok() {}
        while rb.try_recv().is_ok() {}
        while rc.try_recv().is_ok() {}

        f.room
            .signal(
                ConnectionId::from("a"),
                ConnectionId::from("b"),
                Signal::RetryRequest,
            )
            .await
            .unwrap();
        let _ = f.room.get_state().await.unwrap();

        assert_eq!(
            next_event(&mut rb).await,
            ServerEvent::ConnectionRetry {
                sender: ConnectionId::from("a")
            }
        );
        for h in &handles {
            h.ping().await.unwrap();
        }
        assert!(ra.try_recv().is_err());
        assert!(rc.try_recv().is_err());
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_chat_validation_and_broadcast() {
        let f = fixture(None);
        let (a, mut ra) = connect(&f, "a", "U1");
        f.room.join(a, profile("U1"), None).await.unwrap();
        let _ = next_event(&mut ra).await;

        f.room
            .publish(
                ConnectionId::from("a"),
                RoomUpdate::Chat {
                    content: "   ".to_string(),
                    kind: MessageKind::Text,
                },
            )
            .await
            .unwrap();
        match next_event(&mut ra).await {
            ServerEvent::Error { code, .. } => assert_eq!(code, "BAD_REQUEST"),
            other => unreachable!("expected error, got {other:?}"),
        }

        f.room
            .publish(
                ConnectionId::from("a"),
                RoomUpdate::Chat {
                    content: "x".repeat(21),
                    kind: MessageKind::Text,
                },
            )
            .await
            .unwrap();
        assert!(matches!(next_event(&mut ra).await, ServerEvent::Error { .. }));

        f.room
            .publish(
                ConnectionId::from("a"),
                RoomUpdate::Chat {
                    content: "  hello  ".to_string(),
                    kind: MessageKind::Text,
                },
            )
            .await
            .unwrap();
        match next_event(&mut ra).await {
            ServerEvent::NewMessage(message) => assert_eq!(message.content, "hello"),
            other => unreachable!("expected newMessage, got {other:?}"),
        }
        assert_eq!(f.store.messages(&RoomId::from("R1")).await.len(), 1);
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_failed_join_on_empty_room_reports_empty() {
        let mut f = fixture(Some("p1"));
        let (c, _rc) = connect(&f, "c", "U2");

        let result = f.room.join(c, profile("U2"), None).await;
        assert!(result.is_err());

        match f.controller_rx.recv().await.unwrap() {
            ControllerMessage::RoomEmpty { joins_seen, .. } => assert_eq!(joins_seen, 1),
            other => unreachable!("expected RoomEmpty, got {other:?}"),
        }
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_join_with_closed_connection_is_not_registered() {
        let f = fixture(None);
        let (c, _rc) = connect(&f, "c", "U2");
        c.cancel();

        let result = f.room.join(c, profile("U2"), None).await;
        assert!(matches!(result, Err(HubError::NotInRoom(_))));
        let state = f.room.get_state().await.unwrap();
        assert_eq!(state.connection_count, 0);
        f.token.cancel();
    }
}
