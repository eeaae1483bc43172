//! Join Orchestrator.
//!
//! Drives `Idle -> Authorizing -> (PasswordPrompt) -> Registering ->
//! Joined | Failed` per room. One attempt per room is in flight at a time;
//! each attempt has a deadline, and timed-out attempts are retried a fixed
//! number of times with a fixed backoff.
//!
//! Every attempt carries the room's generation number. `cancel`, `leave`
//! and a newer `join` bump the generation, so a response that arrives
//! after its attempt was superseded can no longer change the state.
//!
//! An attempt that is superseded, abandoned (its `join` future dropped) or
//! given up after `joinRoom` went out also sends `leaveRoom`, so the hub
//! never keeps a connection the client has stopped waiting for.

use crate::config::JoinConfig;
use crate::errors::JoinError;
use crate::transport::HubTransport;

use common::protocol::{ClientEvent, ServerEvent};
use common::secret::RoomPassword;
use common::types::{RoomId, RoomSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where a room's join currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinState {
    Idle,
    Authorizing { attempt: u32 },
    /// The room needs a password; call `join` again with one.
    PasswordPrompt { invalid: bool },
    Registering { attempt: u32 },
    Joined(Box<RoomSnapshot>),
    Failed(JoinError),
}

impl JoinState {
    /// True while an attempt is running.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(
            self,
            JoinState::Authorizing { .. } | JoinState::Registering { .. }
        )
    }
}

/// Result of a `join` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Box<RoomSnapshot>),
    /// Another attempt for this room is already running.
    AlreadyInFlight,
}

struct RoomEntry {
    state: watch::Sender<JoinState>,
    generation: u64,
    attempt_token: Option<CancellationToken>,
    /// `joinRoom` went out for the current attempt and no snapshot came back.
    join_sent: bool,
}

impl RoomEntry {
    fn new() -> Self {
        let (state, _) = watch::channel(JoinState::Idle);
        Self {
            state,
            generation: 0,
            attempt_token: None,
            join_sent: false,
        }
    }

    /// Invalidate the current attempt and return to `Idle`. True when the
    /// hub may already have registered the connection.
    fn supersede(&mut self) -> bool {
        self.generation += 1;
        if let Some(token) = self.attempt_token.take() {
            token.cancel();
        }
        self.state.send_replace(JoinState::Idle);
        std::mem::take(&mut self.join_sent)
    }
}

/// Resets the room when a `join` future is dropped mid-attempt.
struct AttemptGuard<'a> {
    orchestrator: &'a JoinOrchestrator,
    room_id: &'a RoomId,
    generation: u64,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.abandon(self.room_id, self.generation);
    }
}

/// Per-client join state machines, one per room.
pub struct JoinOrchestrator {
    transport: Arc<dyn HubTransport>,
    config: JoinConfig,
    rooms: Mutex<HashMap<RoomId, RoomEntry>>,
}

impl JoinOrchestrator {
    #[must_use]
    pub fn new(transport: Arc<dyn HubTransport>, config: JoinConfig) -> Self {
        Self {
            transport,
            config,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Join `room_id`, authorizing first and then registering the
    /// connection with the hub.
    ///
    /// # Errors
    ///
    /// Authorization outcomes (`PasswordRequired`, `InvalidPassword`,
    /// `Forbidden`, `RoomNotFound`, `AuthRequired`) are returned at once.
    /// `Timeout` after every attempt expired, `Cancelled` when superseded.
    #[instrument(skip_all, name = "client.join", fields(room_id = %room_id))]
    pub async fn join(
        &self,
        room_id: &RoomId,
        password: Option<RoomPassword>,
    ) -> Result<JoinOutcome, JoinError> {
        let (generation, token) = {
            let mut rooms = self.rooms();
            let entry = rooms.entry(room_id.clone()).or_insert_with(RoomEntry::new);
            if entry.state.borrow().is_in_flight() {
                debug!(target: "client.join", room_id = %room_id, "Join already in flight");
                return Ok(JoinOutcome::AlreadyInFlight);
            }
            entry.generation += 1;
            let token = CancellationToken::new();
            entry.attempt_token = Some(token.clone());
            entry.join_sent = false;
            entry.state.send_replace(JoinState::Authorizing { attempt: 1 });
            (entry.generation, token)
        };
        let _guard = AttemptGuard {
            orchestrator: self,
            room_id,
            generation,
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = JoinError::Timeout;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::select! {
                    () = token.cancelled() => return Err(JoinError::Cancelled),
                    () = tokio::time::sleep(self.config.backoff) => {}
                }
            }

            let result = tokio::select! {
                () = token.cancelled() => Err(JoinError::Cancelled),
                result = tokio::time::timeout(
                    self.config.attempt_timeout,
                    self.attempt(room_id, password.as_ref(), generation, attempt),
                ) => result.unwrap_or(Err(JoinError::Timeout)),
            };

            match result {
                Ok(snapshot) => {
                    let snapshot = Box::new(snapshot);
                    if !self.transition(room_id, generation, JoinState::Joined(snapshot.clone())) {
                        return Err(JoinError::Cancelled);
                    }
                    self.finish(room_id, generation);
                    info!(
                        target: "client.join",
                        room_id = %room_id,
                        attempt,
                        count = snapshot.count,
                        "Joined room"
                    );
                    return Ok(JoinOutcome::Joined(snapshot));
                }
                Err(JoinError::Cancelled) => return Err(JoinError::Cancelled),
                Err(e) if e.is_retryable() => {
                    warn!(
                        target: "client.join",
                        room_id = %room_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Join attempt failed, retrying"
                    );
                    last_error = e;
                }
                Err(e) => {
                    let state = match &e {
                        JoinError::PasswordRequired => JoinState::PasswordPrompt { invalid: false },
                        JoinError::InvalidPassword => JoinState::PasswordPrompt { invalid: true },
                        other => JoinState::Failed(other.clone()),
                    };
                    if !self.transition(room_id, generation, state) {
                        return Err(JoinError::Cancelled);
                    }
                    self.finish(room_id, generation);
                    info!(target: "client.join", room_id = %room_id, error = %e, "Join refused");
                    return Err(e);
                }
            }
        }

        // Every attempt timed out or hit the network; report a timeout
        // unless the last failure was something more specific.
        let error = match last_error {
            JoinError::Transport(_) => last_error,
            _ => JoinError::Timeout,
        };
        if !self.transition(room_id, generation, JoinState::Failed(error.clone())) {
            return Err(JoinError::Cancelled);
        }
        let join_sent = self.finish(room_id, generation);
        warn!(target: "client.join", room_id = %room_id, error = %error, "Join gave up");
        if join_sent {
            self.send_leave(room_id).await;
        }
        Err(error)
    }

    /// One authorize + register round.
    async fn attempt(
        &self,
        room_id: &RoomId,
        password: Option<&RoomPassword>,
        generation: u64,
        attempt: u32,
    ) -> Result<RoomSnapshot, JoinError> {
        if !self.transition(room_id, generation, JoinState::Authorizing { attempt }) {
            return Err(JoinError::Cancelled);
        }
        let grant = self.transport.authorize(room_id, password).await?;
        debug!(target: "client.join", room_id = %room_id, access = %grant.access, "Authorized");

        // Marked before sending: a cancel racing the send still leaves
        let registering = self.with_current(room_id, generation, |entry| {
            entry.state.send_replace(JoinState::Registering { attempt });
            entry.join_sent = true;
        });
        if !registering {
            return Err(JoinError::Cancelled);
        }

        // Subscribe before sending so the reply cannot be missed
        let mut events = self.transport.subscribe();
        self.transport
            .send(ClientEvent::JoinRoom {
                room_id: room_id.clone(),
                password: password.cloned(),
                profile: None,
            })
            .await?;

        loop {
            match events.recv().await {
                Ok(ServerEvent::RoomSnapshot(snapshot)) if &snapshot.room_id == room_id => {
                    return Ok(snapshot);
                }
                Ok(ServerEvent::JoinRejected {
                    room_id: rejected,
                    code,
                    message,
                }) if &rejected == room_id => {
                    return Err(JoinError::from_code(&code, &message));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(target: "client.join", skipped, "Event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(JoinError::Transport("hub connection closed".to_string()));
                }
            }
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<RoomId, RoomEntry>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the room's entry if `generation` is still its current one.
    fn with_current(
        &self,
        room_id: &RoomId,
        generation: u64,
        f: impl FnOnce(&mut RoomEntry),
    ) -> bool {
        let mut rooms = self.rooms();
        match rooms.get_mut(room_id) {
            Some(entry) if entry.generation == generation => {
                f(entry);
                true
            }
            _ => {
                debug!(target: "client.join", room_id = %room_id, "Dropping stale join result");
                false
            }
        }
    }

    /// Apply `state` if `generation` is still the room's current one.
    fn transition(&self, room_id: &RoomId, generation: u64, state: JoinState) -> bool {
        self.with_current(room_id, generation, |entry| {
            entry.state.send_replace(state);
        })
    }

    /// Close out a settled attempt. True when `joinRoom` went out and the
    /// hub never answered with a snapshot.
    fn finish(&self, room_id: &RoomId, generation: u64) -> bool {
        let mut join_sent = false;
        self.with_current(room_id, generation, |entry| {
            entry.attempt_token = None;
            join_sent = std::mem::take(&mut entry.join_sent);
        });
        join_sent
    }

    fn supersede(&self, room_id: &RoomId) -> bool {
        let mut rooms = self.rooms();
        let Some(entry) = rooms.get_mut(room_id) else {
            return false;
        };
        debug!(target: "client.join", room_id = %room_id, "Join cancelled");
        entry.supersede()
    }

    /// Called when a `join` future goes away. Only an attempt that is still
    /// current and in flight is reset.
    fn abandon(&self, room_id: &RoomId, generation: u64) {
        let join_sent = {
            let mut rooms = self.rooms();
            let Some(entry) = rooms.get_mut(room_id) else {
                return;
            };
            if entry.generation != generation || !entry.state.borrow().is_in_flight() {
                return;
            }
            entry.supersede()
        };
        info!(target: "client.join", room_id = %room_id, "Join abandoned");
        if !join_sent {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(target: "client.join", room_id = %room_id, "No runtime to send leaveRoom");
            return;
        };
        let transport = Arc::clone(&self.transport);
        let room_id = room_id.clone();
        runtime.spawn(async move {
            let event = ClientEvent::LeaveRoom {
                room_id: room_id.clone(),
            };
            if let Err(e) = transport.send(event).await {
                warn!(target: "client.join", room_id = %room_id, error = %e, "Failed to send leaveRoom");
            }
        });
    }

    async fn send_leave(&self, room_id: &RoomId) {
        let event = ClientEvent::LeaveRoom {
            room_id: room_id.clone(),
        };
        if let Err(e) = self.transport.send(event).await {
            warn!(target: "client.join", room_id = %room_id, error = %e, "Failed to send leaveRoom");
        }
    }

    /// Supersede any in-flight attempt for `room_id` and return to `Idle`.
    /// Sends `leaveRoom` when the attempt had already sent `joinRoom`.
    pub async fn cancel(&self, room_id: &RoomId) {
        if self.supersede(room_id) {
            self.send_leave(room_id).await;
        }
    }

    /// Cancel any attempt and tell the hub this connection left the room.
    ///
    /// # Errors
    ///
    /// `JoinError::Transport` when the `leaveRoom` event cannot be sent.
    pub async fn leave(&self, room_id: &RoomId) -> Result<(), JoinError> {
        self.supersede(room_id);
        self.transport
            .send(ClientEvent::LeaveRoom {
                room_id: room_id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Current state of `room_id`.
    pub async fn state(&self, room_id: &RoomId) -> JoinState {
        self.rooms()
            .get(room_id)
            .map_or(JoinState::Idle, |entry| entry.state.borrow().clone())
    }

    /// Watch the state of `room_id`.
    pub async fn subscribe(&self, room_id: &RoomId) -> watch::Receiver<JoinState> {
        self.rooms()
            .entry(room_id.clone())
            .or_insert_with(RoomEntry::new)
            .state
            .subscribe()
    }
}
