//! Hub transport.
//!
//! [`HubTransport`] is the seam the orchestrators talk through: an HTTP
//! authorize call, a way to send protocol events, and a broadcast of
//! every event the hub pushes. [`HubClient`] implements it with `reqwest`
//! and a `tokio-tungstenite` WebSocket.

use crate::config::ClientConfig;
use crate::errors::{JoinError, TransportError};

use async_trait::async_trait;
use common::protocol::{ClientEvent, ServerEvent};
use common::secret::RoomPassword;
use common::types::{RoomId, UserProfile};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Header carrying the caller's user id on HTTP calls.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Capacity of the inbound event broadcast.
const EVENT_BUFFER: usize = 1024;

/// Capacity of the outbound event queue.
const OUTBOUND_BUFFER: usize = 256;

/// Successful authorize response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub room_id: RoomId,
    /// Which rule admitted the caller (`owner`, `password`, ...).
    pub access: String,
}

/// Connection to the hub as seen by the orchestrators.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Ask the hub whether the current user may join `room_id`.
    async fn authorize(
        &self,
        room_id: &RoomId,
        password: Option<&RoomPassword>,
    ) -> Result<AccessGrant, JoinError>;

    /// Queue an event for the hub.
    async fn send(&self, event: ClientEvent) -> Result<(), TransportError>;

    /// Receive every event the hub sends from now on.
    fn subscribe(&self) -> broadcast::Receiver<ServerEvent>;
}

#[derive(Serialize)]
struct AuthorizeBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a RoomPassword>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// WebSocket + HTTP client for one user.
pub struct HubClient {
    http: reqwest::Client,
    hub_url: Url,
    profile: UserProfile,
    outbound: mpsc::Sender<ClientEvent>,
    events: broadcast::Sender<ServerEvent>,
    token: CancellationToken,
}

impl HubClient {
    /// Open the WebSocket and start the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// `TransportError::InvalidUrl` for a malformed hub URL,
    /// `TransportError::Connect` when the upgrade fails.
    #[instrument(skip_all, name = "client.transport.connect", fields(user_id = %profile.user_id))]
    pub async fn connect(
        config: &ClientConfig,
        profile: UserProfile,
    ) -> Result<Self, TransportError> {
        let hub_url =
            Url::parse(&config.hub_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let mut params = vec![
            ("userId", profile.user_id.as_str()),
            ("displayName", profile.display_name.as_str()),
        ];
        if let Some(avatar) = profile.avatar_url.as_deref() {
            params.push(("avatarUrl", avatar));
        }
        let ws_url = Url::parse_with_params(&config.ws_url(), &params)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let (socket, _response) = tokio_tungstenite::connect_async(ws_url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let token = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (outbound, mut outbound_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_BUFFER);

        let writer_token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_token.cancelled() => break,
                    event = outbound_rx.recv() => {
                        let Some(event) = event else { break };
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(target: "client.transport", error = %e, "Event encoding failed");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(target: "client.transport", error = %e, "WebSocket write failed");
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
            writer_token.cancel();
        });

        let reader_token = token.clone();
        let reader_events = events.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reader_token.cancelled() => break,
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                // No subscribers is fine
                                Ok(event) => { let _ = reader_events.send(event); }
                                Err(e) => debug!(
                                    target: "client.transport",
                                    error = %e,
                                    "Unparseable hub frame"
                                ),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(target: "client.transport", error = %e, "WebSocket read failed");
                            break;
                        }
                    }
                }
            }
            reader_token.cancel();
            info!(target: "client.transport", "Hub connection closed");
        });

        info!(target: "client.transport", url = %config.hub_url, "Connected to hub");

        Ok(Self {
            http: reqwest::Client::new(),
            hub_url,
            profile,
            outbound,
            events,
            token,
        })
    }

    /// True once either half of the socket has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close the socket.
    pub fn close(&self) {
        self.token.cancel();
    }

    fn authorize_url(&self, room_id: &RoomId) -> Result<Url, JoinError> {
        let mut url = self.hub_url.clone();
        url.path_segments_mut()
            .map_err(|()| JoinError::Transport("hub URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["rooms", room_id.as_str(), "authorize"]);
        Ok(url)
    }
}

#[async_trait]
impl HubTransport for HubClient {
    #[instrument(skip_all, name = "client.transport.authorize", fields(room_id = %room_id))]
    async fn authorize(
        &self,
        room_id: &RoomId,
        password: Option<&RoomPassword>,
    ) -> Result<AccessGrant, JoinError> {
        let response = self
            .http
            .post(self.authorize_url(room_id)?)
            .header(USER_ID_HEADER, self.profile.user_id.as_str())
            .json(&AuthorizeBody { password })
            .send()
            .await
            .map_err(|e| JoinError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<AccessGrant>()
                .await
                .map_err(|e| JoinError::Transport(format!("invalid authorize response: {e}")));
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => Err(JoinError::from_code(&body.error.code, &body.error.message)),
            Err(_) => Err(JoinError::Transport(format!(
                "authorize failed with status {status}"
            ))),
        }
    }

    async fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if self.token.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(event)
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
