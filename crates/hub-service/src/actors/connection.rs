//! `ConnectionActor` - one per WebSocket connection.
//!
//! Each `ConnectionActor`:
//! - Owns the write half of exactly one client connection
//! - Serializes every outbound event through a single mailbox, so the client
//!   sees room events in the order the room actor published them
//! - Closes the connection when cancelled or when a write fails
//!
//! The read half stays with the session loop in `handlers::ws`.
//!
//! # Lifecycle
//!
//! 1. Spawned at WebSocket upgrade, before the client joins any room
//! 2. Runs until the socket fails, the session ends, or the hub shuts down
//! 3. Cancels its own token on exit so the session loop stops reading

use crate::errors::HubError;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::protocol::ServerEvent;
use common::types::{ConnectionId, UserId};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Write half of a client connection.
#[async_trait::async_trait]
pub trait OutboundSink: Send {
    /// Write one event to the client.
    async fn send_event(&mut self, event: &ServerEvent) -> Result<(), HubError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), HubError>;
}

/// Sink that forwards events into a channel. Used by tests and by
/// in-process clients.
#[derive(Debug)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait::async_trait]
impl OutboundSink for ChannelSink {
    async fn send_event(&mut self, event: &ServerEvent) -> Result<(), HubError> {
        self.sender
            .send(event.clone())
            .map_err(|_| HubError::Internal("client channel closed".to_string()))
    }

    async fn close(&mut self) -> Result<(), HubError> {
        Ok(())
    }
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
    user_id: UserId,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Identity bound to this connection at upgrade time.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Queue an event without waiting.
    ///
    /// Used by room actors so one slow client never stalls a room. A client
    /// whose mailbox is full is disconnected: dropping a single event would
    /// leave it with an inconsistent view of the room.
    ///
    /// # Errors
    ///
    /// Returns `HubError::Internal` if the mailbox is full or closed.
    pub fn deliver(&self, event: ServerEvent) -> Result<(), HubError> {
        match self.sender.try_send(ConnectionMessage::Deliver { event }) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                warn!(
                    target: "hub.actor.connection",
                    connection_id = %self.connection_id,
                    "Connection mailbox full, disconnecting slow client"
                );
                self.cancel_token.cancel();
                Err(HubError::Internal("connection mailbox full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(HubError::Internal("connection closed".to_string()))
            }
        }
    }

    /// Queue an event, waiting for mailbox space.
    pub async fn send(&self, event: ServerEvent) -> Result<(), HubError> {
        self.sender
            .send(ConnectionMessage::Deliver { event })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();
        Ok(())
    }

    /// Close the connection after flushing queued events.
    pub async fn close(&self, reason: impl Into<String>) -> Result<(), HubError> {
        self.sender
            .send(ConnectionMessage::Close {
                reason: reason.into(),
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();
        Ok(())
    }

    /// Ping the connection actor to check liveness.
    pub async fn ping(&self) -> Result<(), HubError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ConnectionMessage::Ping { respond_to: tx })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// True once the connection is closing or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }

    /// Token cancelled when the connection goes away.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    user_id: UserId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Child of the controller's token.
    cancel_token: CancellationToken,
    sink: Box<dyn OutboundSink>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
    events_sent: u64,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: ConnectionId,
        user_id: UserId,
        sink: Box<dyn OutboundSink>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Connection,
            connection_id.as_str(),
        ));

        metrics.connection_created();

        let actor = Self {
            connection_id: connection_id.clone(),
            user_id: user_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            sink,
            metrics,
            mailbox: Arc::clone(&mailbox),
            events_sent: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            user_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "hub.actor.connection",
        fields(connection_id = %self.connection_id, user_id = %self.user_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "hub.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.graceful_close("cancelled").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "hub.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        // Stop the session's read loop as well.
        self.cancel_token.cancel();
        self.metrics.connection_closed();

        info!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            events_sent = self.events_sent,
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => {
                if let Err(e) = self.sink.send_event(&event).await {
                    warn!(
                        target: "hub.actor.connection",
                        connection_id = %self.connection_id,
                        event = event.name(),
                        error = %e,
                        "Write to client failed, closing connection"
                    );
                    return true;
                }
                self.events_sent += 1;
                false
            }

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason).await;
                true
            }

            ConnectionMessage::Ping { respond_to } => {
                let _ = respond_to.send(());
                false
            }
        }
    }

    async fn graceful_close(&mut self, reason: &str) {
        debug!(
            target: "hub.actor.connection",
            connection_id = %self.connection_id,
            reason = %reason,
            "Closing connection"
        );

        if let Err(e) = self.sink.close().await {
            debug!(
                target: "hub.actor.connection",
                connection_id = %self.connection_id,
                error = %e,
                "Close frame could not be sent"
            );
        }
    }
}
