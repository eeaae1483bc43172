//! WebSocket endpoint.
//!
//! `GET /ws?userId=..&displayName=..&avatarUrl=..` upgrades to a socket
//! carrying JSON protocol frames. The user identity is bound here, once;
//! events cannot change it later.
//!
//! The socket is split: the write half goes to a `ConnectionActor`, the
//! read half is driven by the session loop below until the client goes
//! away or the connection actor is cancelled.

use crate::actors::{ConnectionActor, OutboundSink};
use crate::errors::HubError;
use crate::routes::AppState;
use crate::session::Session;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use common::protocol::{ClientEvent, ServerEvent};
use common::types::{ConnectionId, UserId, UserProfile};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Query parameters of the upgrade request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ConnectParams {
    /// Profile bound to the connection.
    ///
    /// # Errors
    ///
    /// `HubError::Unauthenticated` when no user id was supplied.
    pub fn into_profile(self) -> Result<UserProfile, HubError> {
        let user_id = self
            .user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(UserId::from)
            .ok_or(HubError::Unauthenticated)?;

        let mut profile = UserProfile::anonymous(user_id);
        if let Some(name) = self.display_name.filter(|n| !n.trim().is_empty()) {
            profile.display_name = name;
        }
        profile.avatar_url = self.avatar_url;
        Ok(profile)
    }
}

/// Handler for GET /ws
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, HubError> {
    let profile = params.into_profile()?;
    Ok(ws.on_upgrade(move |socket| run_session(socket, profile, state)))
}

/// Write half of an axum WebSocket.
struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait::async_trait]
impl OutboundSink for WsSink {
    async fn send_event(&mut self, event: &ServerEvent) -> Result<(), HubError> {
        let text = serde_json::to_string(event)
            .map_err(|e| HubError::Internal(format!("event encoding failed: {e}")))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| HubError::Internal(format!("websocket write failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), HubError> {
        self.sink
            .close()
            .await
            .map_err(|e| HubError::Internal(format!("websocket close failed: {e}")))
    }
}

#[instrument(
    skip_all,
    name = "hub.ws.session",
    fields(user_id = %profile.user_id, connection_id)
)]
async fn run_session(socket: WebSocket, profile: UserProfile, state: Arc<AppState>) {
    let connection_id = ConnectionId::generate();
    tracing::Span::current().record("connection_id", connection_id.as_str());

    let (sink, mut stream) = socket.split();
    let (connection, _task) = ConnectionActor::spawn(
        connection_id.clone(),
        profile.user_id.clone(),
        Box::new(WsSink { sink }),
        state.controller.child_token(),
        Arc::clone(&state.metrics),
    );
    let token = connection.cancel_token();

    info!(target: "hub.ws", connection_id = %connection_id, "WebSocket connected");

    let mut session = Session::new(connection.clone(), profile, state.controller.clone());

    loop {
        tokio::select! {
            () = token.cancelled() => break,

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => session.handle_event(event).await,
                        Err(e) => {
                            debug!(
                                target: "hub.ws",
                                connection_id = %connection_id,
                                error = %e,
                                "Unparseable client frame"
                            );
                            let error = HubError::BadRequest(format!("Invalid event: {e}"));
                            let _ = connection.deliver(ServerEvent::Error {
                                code: error.error_code().to_string(),
                                message: error.client_message(),
                            });
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by axum; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(
                        target: "hub.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "WebSocket read failed"
                    );
                    break;
                }
            }
        }
    }

    session.close().await;
    info!(target: "hub.ws", connection_id = %connection_id, "WebSocket disconnected");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_user_id_is_unauthenticated() {
        let result = ConnectParams::default().into_profile();
        assert!(matches!(result, Err(HubError::Unauthenticated)));

        let result = ConnectParams {
            user_id: Some("   ".to_string()),
            ..ConnectParams::default()
        }
        .into_profile();
        assert!(matches!(result, Err(HubError::Unauthenticated)));
    }

    #[test]
    fn test_profile_from_params() {
        let profile = ConnectParams {
            user_id: Some("U1".to_string()),
            display_name: Some("Ada".to_string()),
            avatar_url: Some("https://example.test/a.png".to_string()),
        }
        .into_profile()
        .unwrap();

        assert_eq!(profile.user_id, UserId::from("U1"));
        assert_eq!(profile.display_name, "Ada");
        assert!(profile.avatar_url.is_some());
    }

    #[test]
    fn test_display_name_defaults_to_user_id() {
        let profile = ConnectParams {
            user_id: Some("U7".to_string()),
            display_name: Some(String::new()),
            avatar_url: None,
        }
        .into_profile()
        .unwrap();
        assert_eq!(profile.display_name, "U7");
    }
}
