//! HTTP routes for the hub.
//!
//! Defines the Axum router and application state.

use crate::access::AccessGate;
use crate::actors::{ActorMetrics, HubControllerActorHandle};
use crate::config::Config;
use crate::handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Root of the actor hierarchy.
    pub controller: HubControllerActorHandle,

    /// Access checks for the authorize endpoint.
    pub gate: AccessGate,

    /// Shared actor counters.
    pub metrics: Arc<ActorMetrics>,

    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// - `POST /rooms/{room_id}/authorize` - access check, 30 second timeout
/// - `GET /ws` - WebSocket upgrade (long-lived, no timeout)
/// - TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>) -> Router {
    let http_routes = Router::new()
        .route("/rooms/:room_id/authorize", post(handlers::authorize_room))
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    let ws_routes = Router::new().route("/ws", get(handlers::ws_handler));

    http_routes
        .merge(ws_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{RoomDeps, RoomSettings};
    use crate::handlers::authorize::{AuthorizeResponse, USER_ID_HEADER};
    use crate::store::{MemoryRoomStore, RoomStore};
    use crate::sync::DocumentWriter;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use common::types::{RoomAuthSnapshot, RoomId, UserId};
    use http_body_util::BodyExt;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    fn app() -> (Router, HubControllerActorHandle) {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::with_rooms([
            RoomAuthSnapshot {
                room_id: RoomId::from("R1"),
                is_private: false,
                password_hash: Some(bcrypt::hash("p1", 4).unwrap()),
                owner_id: UserId::from("U1"),
                participants: Vec::new(),
                shared_with: Vec::new(),
                document: None,
            },
            RoomAuthSnapshot {
                room_id: RoomId::from("SECRET"),
                is_private: true,
                password_hash: None,
                owner_id: UserId::from("U1"),
                participants: Vec::new(),
                shared_with: Vec::new(),
                document: None,
            },
        ]));
        let config = Config::default();
        let (writer, _) = DocumentWriter::spawn(
            Arc::clone(&store),
            config.document_debounce,
            config.store_timeout,
            CancellationToken::new(),
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
            config,
        });
        (build_routes(state), controller)
    }

    fn authorize(room: &str, user: Option<&str>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(format!("/rooms/{room}/authorize"));
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn error_code(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        value["error"]["code"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_authorize_requires_identity() {
        let (app, controller) = app();
        let response = app.oneshot(authorize("R1", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "AUTH_REQUIRED");
        controller.cancel();
    }

    #[tokio::test]
    async fn test_authorize_password_flow() {
        let (app, controller) = app();

        let response = app
            .clone()
            .oneshot(authorize("R1", Some("U2"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "PASSWORD_REQUIRED");

        let response = app
            .clone()
            .oneshot(authorize("R1", Some("U2"), Some(r#"{"password":"wrong"}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "INVALID_PASSWORD");

        let response = app
            .oneshot(authorize("R1", Some("U2"), Some(r#"{"password":"p1"}"#)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: AuthorizeResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.room_id, RoomId::from("R1"));
        assert_eq!(body.access, "password");
        controller.cancel();
    }

    #[tokio::test]
    async fn test_authorize_unknown_and_private_rooms() {
        let (app, controller) = app();

        let response = app
            .clone()
            .oneshot(authorize("NOPE", Some("U2"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_code(response).await, "ROOM_NOT_FOUND");

        let response = app
            .oneshot(authorize("SECRET", Some("U2"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(response).await, "FORBIDDEN");
        controller.cancel();
    }

    #[tokio::test]
    async fn test_ws_without_upgrade_is_rejected() {
        let (app, controller) = app();
        let response = app
            .oneshot(Request::get("/ws?userId=U1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
        controller.cancel();
    }
}
