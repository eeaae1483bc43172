//! Debounced document persistence for the Code/Cursor Sync Channel.
//!
//! Document changes are fanned out by the room actor immediately; this
//! actor only decides *when* the latest snapshot reaches the store. Every
//! update to a room restarts that room's quiet window. When the window
//! elapses without further updates, exactly one
//! `persist_document_snapshot` is issued carrying the last snapshot.
//!
//! A single writer serves all rooms. Failures are logged and counted, never
//! retried: a later update schedules a fresh write anyway.

use crate::errors::HubError;
use crate::observability::metrics;
use crate::store::{timed, RoomStore};

use common::types::{DocumentSnapshot, RoomId};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, instrument, warn};

const WRITER_CHANNEL_BUFFER: usize = 1000;

#[derive(Debug)]
enum WriterMessage {
    Schedule {
        room_id: RoomId,
        document: DocumentSnapshot,
    },
    Flush {
        room_id: RoomId,
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to the `DocumentWriter` actor.
#[derive(Clone, Debug)]
pub struct DocumentWriterHandle {
    sender: mpsc::Sender<WriterMessage>,
    cancel_token: CancellationToken,
}

impl DocumentWriterHandle {
    /// Record the latest snapshot of a room and restart its quiet window.
    pub async fn schedule(&self, room_id: RoomId, document: DocumentSnapshot) -> Result<(), HubError> {
        self.sender
            .send(WriterMessage::Schedule { room_id, document })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Write the room's pending snapshot now, if any. Resolves once the
    /// write has completed or failed.
    pub async fn flush(&self, room_id: RoomId) -> Result<(), HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriterMessage::Flush {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the writer after flushing every pending snapshot.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// Debounced writer actor.
pub struct DocumentWriter {
    receiver: mpsc::Receiver<WriterMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn RoomStore>,
    debounce: Duration,
    store_timeout: Duration,
    queue: DelayQueue<RoomId>,
    pending: HashMap<RoomId, (DocumentSnapshot, delay_queue::Key)>,
    writes: u64,
}

impl DocumentWriter {
    /// Spawn the writer. It owns its own token so it can outlive the room
    /// actors that flush into it during shutdown.
    pub fn spawn(
        store: Arc<dyn RoomStore>,
        debounce: Duration,
        store_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> (DocumentWriterHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(WRITER_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            store,
            debounce,
            store_timeout,
            queue: DelayQueue::new(),
            pending: HashMap::new(),
            writes: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            DocumentWriterHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "hub.sync.writer")]
    async fn run(mut self) {
        info!(
            target: "hub.sync",
            debounce_ms = self.debounce.as_millis(),
            "DocumentWriter started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    let waiting = self.drain_mailbox();
                    self.flush_all().await;
                    for respond_to in waiting {
                        let _ = respond_to.send(());
                    }
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            self.flush_all().await;
                            break;
                        }
                    }
                }

                Some(expired) = self.queue.next(), if !self.queue.is_empty() => {
                    let room_id = expired.into_inner();
                    if let Some((document, _)) = self.pending.remove(&room_id) {
                        self.write(&room_id, &document).await;
                    }
                }
            }
        }

        info!(
            target: "hub.sync",
            writes = self.writes,
            "DocumentWriter stopped"
        );
    }

    async fn handle_message(&mut self, message: WriterMessage) {
        match message {
            WriterMessage::Schedule { room_id, document } => self.schedule(room_id, document),
            WriterMessage::Flush {
                room_id,
                respond_to,
            } => {
                if let Some((document, key)) = self.pending.remove(&room_id) {
                    self.queue.remove(&key);
                    self.write(&room_id, &document).await;
                }
                let _ = respond_to.send(());
            }
        }
    }

    fn schedule(&mut self, room_id: RoomId, document: DocumentSnapshot) {
        match self.pending.get_mut(&room_id) {
            Some((latest, key)) => {
                *latest = document;
                self.queue.reset(key, self.debounce);
            }
            None => {
                let key = self.queue.insert(room_id.clone(), self.debounce);
                self.pending.insert(room_id, (document, key));
            }
        }
    }

    /// Apply any schedules still sitting in the mailbox so shutdown does not
    /// lose the very last edits. Returns the flush requests to answer once
    /// everything is written.
    fn drain_mailbox(&mut self) -> Vec<oneshot::Sender<()>> {
        let mut waiting = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                WriterMessage::Schedule { room_id, document } => self.schedule(room_id, document),
                WriterMessage::Flush { respond_to, .. } => waiting.push(respond_to),
            }
        }
        waiting
    }

    async fn flush_all(&mut self) {
        let pending: Vec<_> = self.pending.drain().collect();
        self.queue.clear();

        if !pending.is_empty() {
            debug!(target: "hub.sync", rooms = pending.len(), "Flushing pending documents");
        }
        for (room_id, (document, _)) in pending {
            self.write(&room_id, &document).await;
        }
    }

    async fn write(&mut self, room_id: &RoomId, document: &DocumentSnapshot) {
        let result = timed(
            "persist_document_snapshot",
            self.store_timeout,
            self.store.persist_document_snapshot(room_id, document),
        )
        .await;

        match result {
            Ok(()) => {
                self.writes += 1;
                metrics::record_document_write("success");
                debug!(
                    target: "hub.sync",
                    room_id = %room_id,
                    bytes = document.content.len(),
                    "Document snapshot persisted"
                );
            }
            Err(HubError::StoreTimeout(_)) => {
                metrics::record_document_write("timeout");
                warn!(target: "hub.sync", room_id = %room_id, "Document write timed out");
            }
            Err(e) => {
                metrics::record_document_write("error");
                warn!(target: "hub.sync", room_id = %room_id, error = %e, "Document write failed");
            }
        }
    }
}
