//! `HubControllerActor` - singleton supervisor for room actors.
//!
//! - Singleton per hub process
//! - Creates a `RoomActor` on the first join of a room, removes it once the
//!   room reports itself empty
//! - Indexes which room each connection is registered in, so a disconnect
//!   or a switch to another room reaches the right actor
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Room removal
//!
//! A room reports `RoomEmpty` with the number of joins it has processed.
//! The controller removes it only if that matches the number of joins it
//! forwarded; otherwise a join is still queued and the room stays.
//!
//! # Graceful Shutdown
//!
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to rooms and connections)
//! 3. Waits for every room actor to flush and stop
//! 4. Answers the pending `shutdown` callers

use crate::errors::HubError;

use super::connection::ConnectionActorHandle;
use super::messages::{ControllerMessage, ControllerStatus, JoinAccepted};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomDeps};

use common::secret::RoomPassword;
use common::types::{ConnectionId, RoomId, UserProfile};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How long a removed room may take to flush and stop.
const ROOM_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long shutdown waits for each room.
const SHUTDOWN_ROOM_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the `HubControllerActor`.
#[derive(Clone, Debug)]
pub struct HubControllerActorHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl HubControllerActorHandle {
    /// Create a new `HubControllerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(deps: RoomDeps, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = HubControllerActor::new(
            receiver,
            sender.downgrade(),
            cancel_token.clone(),
            deps,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Register a connection in a room.
    ///
    /// A connection registered in a different room is removed from it first.
    /// On success the `roomSnapshot` has already been queued to the
    /// connection.
    pub async fn join(
        &self,
        room_id: RoomId,
        connection: ConnectionActorHandle,
        profile: UserProfile,
        password: Option<RoomPassword>,
    ) -> Result<JoinAccepted, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Join {
                room_id,
                connection,
                profile,
                password,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove a connection from a room it explicitly left.
    pub async fn leave(
        &self,
        room_id: RoomId,
        connection_id: ConnectionId,
    ) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Leave {
                room_id,
                connection_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Report that a connection's socket is gone.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.sender
            .send(ControllerMessage::Disconnect { connection_id })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Get the current controller status.
    pub async fn get_status(&self) -> Result<ControllerStatus, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Drain the hub. Resolves once every room actor has stopped.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning connection actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    /// Joins sent to this room actor, compared against its `joins_seen`.
    joins_forwarded: u64,
}

/// The `HubControllerActor` implementation.
pub struct HubControllerActor {
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Given to room actors so they can report `RoomEmpty`. Weak so the
    /// mailbox closes once every external handle is dropped.
    self_sender: mpsc::WeakSender<ControllerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    deps: RoomDeps,
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Room each connection was last sent to.
    connection_rooms: HashMap<ConnectionId, RoomId>,
    accepting_new: bool,
    shutdown_waiters: Vec<oneshot::Sender<Result<(), HubError>>>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl HubControllerActor {
    fn new(
        receiver: mpsc::Receiver<ControllerMessage>,
        self_sender: mpsc::WeakSender<ControllerMessage>,
        cancel_token: CancellationToken,
        deps: RoomDeps,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            receiver,
            self_sender,
            cancel_token,
            deps,
            rooms: HashMap::new(),
            connection_rooms: HashMap::new(),
            accepting_new: true,
            shutdown_waiters: Vec::new(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Controller, "controller"),
        }
    }

    #[instrument(skip_all, name = "hub.actor.controller")]
    async fn run(mut self) {
        info!(target: "hub.actor.controller", "HubControllerActor started");

        loop {
            // Check for terminated room actors
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "hub.actor.controller",
                        "HubControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
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
                            info!(
                                target: "hub.actor.controller",
                                "HubControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        info!(
            target: "hub.actor.controller",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "HubControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Join {
                room_id,
                connection,
                profile,
                password,
                respond_to,
            } => {
                self.join(room_id, connection, profile, password, respond_to)
                    .await;
            }

            ControllerMessage::Leave {
                room_id,
                connection_id,
                respond_to,
            } => {
                let result = self.leave(&room_id, connection_id).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::Disconnect { connection_id } => {
                if let Some(room_id) = self.connection_rooms.get(&connection_id).cloned() {
                    let _ = self.leave(&room_id, connection_id).await;
                }
            }

            ControllerMessage::RoomEmpty {
                room_id,
                joins_seen,
            } => self.room_empty(&room_id, joins_seen),

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown { respond_to } => {
                info!(
                    target: "hub.actor.controller",
                    room_count = self.rooms.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.shutdown_waiters.push(respond_to);
                self.cancel_token.cancel();
            }
        }
    }

    /// Forward a join to its room without waiting for the room's answer.
    async fn join(
        &mut self,
        room_id: RoomId,
        connection: ConnectionActorHandle,
        profile: UserProfile,
        password: Option<RoomPassword>,
        respond_to: oneshot::Sender<Result<JoinAccepted, HubError>>,
    ) {
        if !self.accepting_new {
            let _ = respond_to.send(Err(HubError::Draining));
            return;
        }

        let connection_id = connection.connection_id().clone();

        if let Some(previous) = self.connection_rooms.get(&connection_id).cloned() {
            if previous != room_id {
                debug!(
                    target: "hub.actor.controller",
                    connection_id = %connection_id,
                    from = %previous,
                    to = %room_id,
                    "Connection switching rooms"
                );
                let _ = self.leave(&previous, connection_id.clone()).await;
            }
        }

        let room = match self.room_for(&room_id) {
            Ok(room) => room,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        self.connection_rooms.insert(connection_id, room_id.clone());

        let reply = match room.request_join(connection, profile, password).await {
            Ok(reply) => reply,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        tokio::spawn(async move {
            let result = match reply.await {
                Ok(result) => result.map(|snapshot| JoinAccepted { snapshot, room }),
                Err(e) => Err(HubError::Internal(format!("response receive failed: {e}"))),
            };
            let _ = respond_to.send(result);
        });
    }

    /// Handle of the live actor for `room_id`, spawning one if needed.
    /// Counts the join about to be forwarded.
    fn room_for(&mut self, room_id: &RoomId) -> Result<RoomActorHandle, HubError> {
        if let Some(managed) = self.rooms.get_mut(room_id) {
            if !managed.task_handle.is_finished() {
                managed.joins_forwarded += 1;
                return Ok(managed.handle.clone());
            }
        }

        let controller = self
            .self_sender
            .upgrade()
            .ok_or_else(|| HubError::Internal("controller mailbox closed".to_string()))?;

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            self.deps.clone(),
            controller,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        if self
            .rooms
            .insert(
                room_id.clone(),
                ManagedRoom {
                    handle: handle.clone(),
                    task_handle,
                    joins_forwarded: 1,
                },
            )
            .is_none()
        {
            self.metrics.room_created();
        }

        info!(
            target: "hub.actor.controller",
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    async fn leave(
        &mut self,
        room_id: &RoomId,
        connection_id: ConnectionId,
    ) -> Result<(), HubError> {
        if self.connection_rooms.get(&connection_id) != Some(room_id) {
            return Err(HubError::NotInRoom(room_id.to_string()));
        }
        self.connection_rooms.remove(&connection_id);

        match self.rooms.get(room_id) {
            Some(managed) => managed.handle.leave(connection_id).await,
            None => Ok(()),
        }
    }

    fn room_empty(&mut self, room_id: &RoomId, joins_seen: u64) {
        let Some(managed) = self.rooms.get(room_id) else {
            return;
        };

        if managed.joins_forwarded != joins_seen {
            debug!(
                target: "hub.actor.controller",
                room_id = %room_id,
                joins_forwarded = managed.joins_forwarded,
                joins_seen,
                "Room reported empty with joins still queued, keeping it"
            );
            return;
        }

        self.remove_room(room_id);
    }

    /// Remove a room without blocking the message loop on its shutdown.
    fn remove_room(&mut self, room_id: &RoomId) {
        let Some(managed) = self.rooms.remove(room_id) else {
            return;
        };

        managed.handle.cancel();
        self.connection_rooms.retain(|_, room| room != room_id);

        let room_id_owned = room_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_STOP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "hub.actor.controller",
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "hub.actor.controller",
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "hub.actor.controller",
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        self.metrics.room_removed();

        info!(
            target: "hub.actor.controller",
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor removed"
        );
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "hub.actor.controller",
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        // Rooms flush their documents before stopping
        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(SHUTDOWN_ROOM_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "hub.actor.controller",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "hub.actor.controller",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "hub.actor.controller",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }
        self.connection_rooms.clear();

        info!(target: "hub.actor.controller", "Graceful shutdown complete");
    }

    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            self.connection_rooms.retain(|_, room| *room != room_id);

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "hub.actor.controller",
                        room_id = %room_id,
                        "Room actor exited on its own"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "hub.actor.controller",
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked, its connections must rejoin"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.metrics.room_removed();
        }
    }
}
