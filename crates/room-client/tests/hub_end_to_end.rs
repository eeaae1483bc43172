//! Client stack against a real hub: HTTP authorize, WebSocket join, and
//! peer negotiation relayed through the hub.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::protocol::ServerEvent;
use common::secret::RoomPassword;
use common::types::{ConnectionId, RoomId, RoomSnapshot};
use hub_test_utils::{profile, MockMediaEngine, MockRoomStore, TestHubServer, TestRoom};
use room_client::config::ClientConfig;
use room_client::errors::JoinError;
use room_client::join::{JoinOrchestrator, JoinOutcome};
use room_client::peer::{OutboundSignal, PeerManager, PeerState, PeerStateEvent, SharedCapture};
use room_client::transport::{HubClient, HubTransport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

fn client_config(server: &TestHubServer) -> ClientConfig {
    ClientConfig::from_vars(&HashMap::from([
        ("ROOM_HUB_URL".to_string(), server.url()),
        ("ROOM_JOIN_TIMEOUT_MS".to_string(), "2000".to_string()),
        ("ROOM_JOIN_BACKOFF_MS".to_string(), "50".to_string()),
    ]))
    .unwrap()
}

async fn hub_client(server: &TestHubServer, user: &str) -> Arc<HubClient> {
    Arc::new(
        HubClient::connect(&client_config(server), profile(user))
            .await
            .unwrap(),
    )
}

async fn joined(
    orchestrator: &JoinOrchestrator,
    room: &RoomId,
    password: Option<&str>,
) -> Result<RoomSnapshot, JoinError> {
    match orchestrator
        .join(room, password.map(RoomPassword::from))
        .await?
    {
        JoinOutcome::Joined(snapshot) => Ok(*snapshot),
        JoinOutcome::AlreadyInFlight => unreachable!("no concurrent joins in this test"),
    }
}

#[tokio::test]
async fn test_join_public_room() {
    let store = MockRoomStore::new().with_room(TestRoom::new("R1").with_document("x = 1", "python"));
    let server = TestHubServer::spawn(&store).await.unwrap();
    let transport = hub_client(&server, "U1").await;
    let orchestrator = JoinOrchestrator::new(transport, client_config(&server).join);

    let snapshot = joined(&orchestrator, &RoomId::from("R1"), None).await.unwrap();

    assert_eq!(snapshot.count, 1);
    assert_eq!(snapshot.document.unwrap().content, "x = 1");
    let me = snapshot.participants.first().unwrap();
    assert_eq!(me.profile.display_name, "User U1");
    assert_eq!(me.connection_id, snapshot.connection_id);
}

#[tokio::test]
async fn test_password_prompt_over_http() {
    let store = MockRoomStore::new().with_room(TestRoom::new("R1").with_password("p1"));
    let server = TestHubServer::spawn(&store).await.unwrap();
    let transport = hub_client(&server, "U2").await;
    let orchestrator = JoinOrchestrator::new(transport, client_config(&server).join);
    let room = RoomId::from("R1");

    assert_eq!(
        joined(&orchestrator, &room, None).await.unwrap_err(),
        JoinError::PasswordRequired
    );
    assert_eq!(
        joined(&orchestrator, &room, Some("nope")).await.unwrap_err(),
        JoinError::InvalidPassword
    );
    let snapshot = joined(&orchestrator, &room, Some("p1")).await.unwrap();
    assert_eq!(snapshot.room_id, room);
}

#[tokio::test]
async fn test_unknown_and_private_rooms() {
    let store = MockRoomStore::new().with_room(TestRoom::new("SECRET").private());
    let server = TestHubServer::spawn(&store).await.unwrap();
    let transport = hub_client(&server, "U2").await;
    let orchestrator = JoinOrchestrator::new(transport, client_config(&server).join);

    assert_eq!(
        joined(&orchestrator, &RoomId::from("NOPE"), None)
            .await
            .unwrap_err(),
        JoinError::RoomNotFound
    );
    assert_eq!(
        joined(&orchestrator, &RoomId::from("SECRET"), None)
            .await
            .unwrap_err(),
        JoinError::Forbidden
    );
}

/// Pump hub events into the manager and link signals out to the hub until
/// the socket closes.
fn drive(
    transport: Arc<HubClient>,
    mut manager: PeerManager,
    mut signals: mpsc::UnboundedReceiver<OutboundSignal>,
) {
    let mut events = transport.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => manager.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(signal) = signals.recv() => {
                    let event = signal.into_client_event(manager.room_id().clone());
                    if transport.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
        manager.close().await;
    });
}

async fn wait_connected(states: &mut broadcast::Receiver<PeerStateEvent>, remote: &ConnectionId) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = states.recv().await.unwrap();
            if &event.remote == remote && event.to == PeerState::Connected {
                return;
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_peers_negotiate_through_the_hub() {
    let store = MockRoomStore::new().with_room(TestRoom::new("R1"));
    let server = TestHubServer::spawn(&store).await.unwrap();
    let room = RoomId::from("R1");
    let config = client_config(&server);

    let mut sides = Vec::new();
    for user in ["U1", "U2"] {
        let transport = hub_client(&server, user).await;
        let orchestrator = JoinOrchestrator::new(
            Arc::clone(&transport) as Arc<dyn HubTransport>,
            config.join,
        );
        let snapshot = joined(&orchestrator, &room, None).await.unwrap();

        let engine = MockMediaEngine::new().with_auto_connect().with_local_candidates(2);
        let (mut manager, signals) = PeerManager::new(
            room.clone(),
            snapshot.connection_id.clone(),
            profile(user).user_id,
            Arc::new(engine.clone()),
            &SharedCapture::default(),
            config.peer,
        );
        let states = manager.subscribe_states();
        manager
            .handle_event(ServerEvent::RoomSnapshot(snapshot.clone()))
            .await;
        drive(Arc::clone(&transport), manager, signals);
        sides.push((snapshot.connection_id, engine, states, orchestrator));
    }

    let (second_id, second_engine, mut second_states, _) = sides.pop().unwrap();
    let (first_id, first_engine, mut first_states, _) = sides.pop().unwrap();

    wait_connected(&mut first_states, &second_id).await;
    wait_connected(&mut second_states, &first_id).await;

    // Exactly one side offered
    let offers = first_engine.offers(&second_id).len() + second_engine.offers(&first_id).len();
    assert_eq!(offers, 1);
    let initiator = if first_id < second_id {
        &first_engine
    } else {
        &second_engine
    };
    let remote = if first_id < second_id { &second_id } else { &first_id };
    assert_eq!(initiator.offers(remote), vec![false]);
}
