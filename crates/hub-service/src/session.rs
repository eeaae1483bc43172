//! Per-socket session: dispatches decoded client events.
//!
//! A session is bound to one `ConnectionActor` and one user identity, both
//! fixed at upgrade time. It tracks the single room the connection is
//! registered in and refuses room events addressed to any other room.

use crate::actors::{
    ConnectionActorHandle, HubControllerActorHandle, RoomActorHandle, RoomUpdate,
};
use crate::errors::HubError;
use crate::signaling::Signal;

use chrono::Utc;
use common::protocol::{ClientEvent, ServerEvent};
use common::secret::RoomPassword;
use common::types::{RoomId, UserProfile};
use tracing::{debug, info, warn};

pub struct Session {
    connection: ConnectionActorHandle,
    profile: UserProfile,
    controller: HubControllerActorHandle,
    current: Option<(RoomId, RoomActorHandle)>,
}

impl Session {
    #[must_use]
    pub fn new(
        connection: ConnectionActorHandle,
        profile: UserProfile,
        controller: HubControllerActorHandle,
    ) -> Self {
        Self {
            connection,
            profile,
            controller,
            current: None,
        }
    }

    /// Room the connection is registered in, if any.
    #[must_use]
    pub fn current_room(&self) -> Option<&RoomId> {
        self.current.as_ref().map(|(room_id, _)| room_id)
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionActorHandle {
        &self.connection
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        debug!(
            target: "hub.ws",
            connection_id = %self.connection.connection_id(),
            event = event.name(),
            "Client event"
        );

        match event {
            ClientEvent::JoinRoom {
                room_id,
                password,
                profile,
            } => {
                if let Some(profile) = profile {
                    self.merge_profile(profile);
                }
                self.join(room_id, password).await;
            }

            ClientEvent::LeaveRoom { room_id } => self.leave(room_id).await,

            ClientEvent::Ping => {
                self.reply(ServerEvent::Pong {
                    date: Utc::now().to_rfc3339(),
                });
            }

            ClientEvent::DocumentChange {
                room_id,
                delta,
                language,
            } => {
                self.publish(&room_id, RoomUpdate::Document { delta, language })
                    .await;
            }

            ClientEvent::CursorChange { room_id, position } => {
                self.publish(&room_id, RoomUpdate::Cursor { position }).await;
            }

            ClientEvent::SendMessage {
                room_id,
                content,
                kind,
            } => {
                self.publish(&room_id, RoomUpdate::Chat { content, kind })
                    .await;
            }

            event @ (ClientEvent::Offer { .. }
            | ClientEvent::Answer { .. }
            | ClientEvent::IceCandidate { .. }
            | ClientEvent::RetryRequest { .. }
            | ClientEvent::RenegotiateRequest { .. }) => self.relay(event).await,
        }
    }

    /// Leave the current room and stop the connection actor.
    pub async fn close(&mut self) {
        let connection_id = self.connection.connection_id().clone();
        self.current = None;

        if let Err(e) = self.controller.disconnect(connection_id.clone()).await {
            debug!(
                target: "hub.ws",
                connection_id = %connection_id,
                error = %e,
                "Disconnect not delivered, hub is stopping"
            );
        }
        self.connection.cancel();
    }

    /// Display fields come from the client; the identity does not.
    fn merge_profile(&mut self, profile: UserProfile) {
        if profile.user_id != self.profile.user_id {
            debug!(
                target: "hub.ws",
                bound = %self.profile.user_id,
                supplied = %profile.user_id,
                "Ignoring client-supplied user id"
            );
        }
        if !profile.display_name.trim().is_empty() {
            self.profile.display_name = profile.display_name;
        }
        if profile.avatar_url.is_some() {
            self.profile.avatar_url = profile.avatar_url;
        }
    }

    async fn join(&mut self, room_id: RoomId, password: Option<RoomPassword>) {
        let result = self
            .controller
            .join(
                room_id.clone(),
                self.connection.clone(),
                self.profile.clone(),
                password,
            )
            .await;

        match result {
            Ok(accepted) => {
                info!(
                    target: "hub.ws",
                    connection_id = %self.connection.connection_id(),
                    room_id = %room_id,
                    present = accepted.snapshot.count,
                    "Joined room"
                );
                self.current = Some((room_id, accepted.room));
            }
            Err(e) => {
                debug!(
                    target: "hub.ws",
                    connection_id = %self.connection.connection_id(),
                    room_id = %room_id,
                    code = e.error_code(),
                    "Join rejected"
                );
                // The controller already took the connection out of any
                // other room.
                if self.current_room() != Some(&room_id) {
                    self.current = None;
                }
                self.reply(ServerEvent::JoinRejected {
                    room_id,
                    code: e.error_code().to_string(),
                    message: e.client_message(),
                });
            }
        }
    }

    async fn leave(&mut self, room_id: RoomId) {
        if self.current_room() != Some(&room_id) {
            debug!(
                target: "hub.ws",
                connection_id = %self.connection.connection_id(),
                room_id = %room_id,
                "Leave for a room the connection is not in"
            );
            return;
        }
        self.current = None;

        if let Err(e) = self
            .controller
            .leave(room_id, self.connection.connection_id().clone())
            .await
        {
            debug!(
                target: "hub.ws",
                connection_id = %self.connection.connection_id(),
                error = %e,
                "Leave failed"
            );
        }
    }

    async fn publish(&mut self, room_id: &RoomId, update: RoomUpdate) {
        let Some(room) = self.room_for(room_id) else {
            return;
        };
        let connection_id = self.connection.connection_id().clone();

        if let Err(e) = room.publish(connection_id, update).await {
            self.room_gone(&e);
        }
    }

    async fn relay(&mut self, event: ClientEvent) {
        let Some(room_id) = event.room_id().cloned() else {
            return;
        };
        let Some(room) = self.room_for(&room_id) else {
            return;
        };
        let Some((target, signal)) = Signal::from_client_event(event) else {
            return;
        };
        let sender = self.connection.connection_id().clone();

        if let Err(e) = room.signal(sender, target, signal).await {
            self.room_gone(&e);
        }
    }

    /// Handle of the current room if it is `room_id`; otherwise tells the
    /// client it is not in that room.
    fn room_for(&self, room_id: &RoomId) -> Option<RoomActorHandle> {
        match &self.current {
            Some((current, room)) if current == room_id => Some(room.clone()),
            _ => {
                let error = HubError::NotInRoom(room_id.to_string());
                self.reply(ServerEvent::Error {
                    code: error.error_code().to_string(),
                    message: error.client_message(),
                });
                None
            }
        }
    }

    /// The room actor stopped underneath the session.
    fn room_gone(&mut self, error: &HubError) {
        warn!(
            target: "hub.ws",
            connection_id = %self.connection.connection_id(),
            error = %error,
            "Room unavailable, client must rejoin"
        );
        self.current = None;
        let error = HubError::NotInRoom("room stopped".to_string());
        self.reply(ServerEvent::Error {
            code: error.error_code().to_string(),
            message: error.client_message(),
        });
    }

    fn reply(&self, event: ServerEvent) {
        if let Err(e) = self.connection.deliver(event) {
            debug!(
                target: "hub.ws",
                connection_id = %self.connection.connection_id(),
                error = %e,
                "Reply not delivered"
            );
        }
    }
}
