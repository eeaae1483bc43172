//! Test server harness for E2E testing
//!
//! Provides `TestHubServer` for spawning a real hub, backed by a
//! `MockRoomStore`, on a random local port.

use crate::mock_store::MockRoomStore;

use hub_service::access::AccessGate;
use hub_service::actors::{ActorMetrics, HubControllerActorHandle, RoomDeps, RoomSettings};
use hub_service::config::Config;
use hub_service::routes::{build_routes, AppState};
use hub_service::store::RoomStore;
use hub_service::sync::DocumentWriter;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Test harness for spawning the hub in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_join_flow_e2e() -> Result<()> {
///     let store = MockRoomStore::new().with_room(TestRoom::new("R1"));
///     let server = TestHubServer::spawn(&store).await?;
///
///     let (socket, _) = connect_async(server.ws_url("U1")).await?;
///     // ...
///     Ok(())
/// }
/// ```
pub struct TestHubServer {
    addr: SocketAddr,
    config: Config,
    controller: HubControllerActorHandle,
    writer_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestHubServer {
    /// Spawn a hub with the default configuration.
    pub async fn spawn(store: &MockRoomStore) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(store, &HashMap::new()).await
    }

    /// Spawn a hub with configuration taken from `vars` (e.g. a short
    /// `HUB_DOCUMENT_DEBOUNCE_MS`).
    pub async fn spawn_with_vars(
        store: &MockRoomStore,
        vars: &HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let store: Arc<dyn RoomStore> = Arc::new(store.clone());
        let writer_token = CancellationToken::new();
        let (writer, _) = DocumentWriter::spawn(
            Arc::clone(&store),
            config.document_debounce,
            config.store_timeout,
            writer_token.clone(),
        );

        let metrics = ActorMetrics::new();
        let controller = HubControllerActorHandle::new(
            RoomDeps {
                store: Arc::clone(&store),
                writer,
                settings: RoomSettings {
                    recent_message_limit: config.recent_message_limit,
                    max_message_length: config.max_message_length,
                    store_timeout: config.store_timeout,
                },
            },
            Arc::clone(&metrics),
        );

        let state = Arc::new(AppState {
            controller: controller.clone(),
            gate: AccessGate::new(store, config.store_timeout),
            metrics,
            config: config.clone(),
        });
        let app = build_routes(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            controller,
            writer_token,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL for `user`.
    pub fn ws_url(&self, user: &str) -> String {
        format!(
            "ws://{}/ws?userId={user}&displayName=User%20{user}",
            self.addr
        )
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &HubControllerActorHandle {
        &self.controller
    }
}

impl Drop for TestHubServer {
    fn drop(&mut self) {
        self.controller.cancel();
        self.writer_token.cancel();
        self._handle.abort();
    }
}
