//! Room flows through the session layer against a scripted store.
//!
//! Each test wires a controller and document writer to a `MockRoomStore`
//! and drives connections through `Session`, reading what the client
//! would see from a channel sink.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::protocol::{ClientEvent, ServerEvent};
use common::secret::RoomPassword;
use common::types::{
    ConnectionId, DocumentSnapshot, IceCandidate, MessageKind, RoomId, SessionDescription, UserId,
};
use hub_service::actors::{
    ActorMetrics, ChannelSink, ConnectionActor, HubControllerActorHandle, RoomDeps, RoomSettings,
};
use hub_service::session::Session;
use hub_service::store::RoomStore;
use hub_service::sync::DocumentWriter;
use hub_test_utils::{profile, MockRoomStore, StoreOp, TestRoom};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DEBOUNCE: Duration = Duration::from_secs(2);
const STORE_TIMEOUT: Duration = Duration::from_secs(1);

struct Hub {
    controller: HubControllerActorHandle,
    metrics: Arc<ActorMetrics>,
    writer_token: CancellationToken,
}

impl Hub {
    fn start(store: &MockRoomStore) -> Self {
        let store: Arc<dyn RoomStore> = Arc::new(store.clone());
        let writer_token = CancellationToken::new();
        let (writer, _) = DocumentWriter::spawn(
            Arc::clone(&store),
            DEBOUNCE,
            STORE_TIMEOUT,
            writer_token.clone(),
        );
        let metrics = ActorMetrics::new();
        let controller = HubControllerActorHandle::new(
            RoomDeps {
                store,
                writer,
                settings: RoomSettings {
                    recent_message_limit: 50,
                    max_message_length: 4000,
                    store_timeout: STORE_TIMEOUT,
                },
            },
            Arc::clone(&metrics),
        );
        Self {
            controller,
            metrics,
            writer_token,
        }
    }

    fn connect(&self, connection: &str, user: &str) -> Client {
        let (sink, events) = ChannelSink::new();
        let (handle, _) = ConnectionActor::spawn(
            ConnectionId::from(connection),
            UserId::from(user),
            Box::new(sink),
            self.controller.child_token(),
            Arc::clone(&self.metrics),
        );
        Client {
            session: Session::new(handle, profile(user), self.controller.clone()),
            events,
        }
    }

    fn stop(self) {
        self.controller.cancel();
        self.writer_token.cancel();
    }
}

struct Client {
    session: Session,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Client {
    async fn send(&mut self, event: ClientEvent) {
        self.session.handle_event(event).await;
    }

    async fn join(&mut self, room: &str, password: Option<&str>) -> ServerEvent {
        self.send(ClientEvent::JoinRoom {
            room_id: RoomId::from(room),
            password: password.map(RoomPassword::from),
            profile: None,
        })
        .await;
        self.next().await
    }

    async fn next(&mut self) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    /// Everything delivered so far.
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Let actors process everything queued.
async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn rejection_code(event: &ServerEvent) -> &str {
    match event {
        ServerEvent::JoinRejected { code, .. } => code,
        other => unreachable!("expected joinRejected, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_password_room_admits_after_correct_password() {
    let store = MockRoomStore::new().with_room(TestRoom::new("R1").with_password("p1"));
    let hub = Hub::start(&store);
    let mut owner = hub.connect("c1", "U1");
    let mut guest = hub.connect("c2", "U2");

    assert!(matches!(owner.join("R1", None).await, ServerEvent::RoomSnapshot(_)));

    assert_eq!(rejection_code(&guest.join("R1", None).await), "PASSWORD_REQUIRED");
    assert_eq!(
        rejection_code(&guest.join("R1", Some("nope")).await),
        "INVALID_PASSWORD"
    );
    match guest.join("R1", Some("p1")).await {
        ServerEvent::RoomSnapshot(snapshot) => assert_eq!(snapshot.count, 2),
        other => unreachable!("expected roomSnapshot, got {other:?}"),
    }

    // Rejected attempts never reached the participant list
    assert_eq!(
        store.participant_writes(&RoomId::from("R1")),
        vec![UserId::from("U1"), UserId::from("U2")]
    );
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_rejects_join() {
    let store = MockRoomStore::new()
        .with_room(TestRoom::new("R1"))
        .failing(StoreOp::FetchAuthSnapshot);
    let hub = Hub::start(&store);
    let mut client = hub.connect("c1", "U1");

    assert_eq!(rejection_code(&client.join("R1", None).await), "INTERNAL_ERROR");
    assert!(client.session.current_room().is_none());

    store.set_failing(StoreOp::FetchAuthSnapshot, false);
    assert!(matches!(client.join("R1", None).await, ServerEvent::RoomSnapshot(_)));
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_times_out_join() {
    let store = MockRoomStore::new()
        .with_room(TestRoom::new("R1"))
        .with_latency(StoreOp::FetchAuthSnapshot, Duration::from_secs(3));
    let hub = Hub::start(&store);
    let mut client = hub.connect("c1", "U1");

    assert_eq!(rejection_code(&client.join("R1", None).await), "TIMEOUT");
    assert_eq!(store.call_count(StoreOp::PersistParticipant), 0);
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_join_without_history_when_messages_unavailable() {
    let store = MockRoomStore::new()
        .with_room(TestRoom::new("R1").with_document("print(1)", "python"))
        .failing(StoreOp::FetchRecentMessages);
    let hub = Hub::start(&store);
    let mut client = hub.connect("c1", "U1");

    match client.join("R1", None).await {
        ServerEvent::RoomSnapshot(snapshot) => {
            assert!(snapshot.recent_messages.is_empty());
            assert_eq!(
                snapshot.document,
                Some(DocumentSnapshot {
                    content: "print(1)".to_string(),
                    language: "python".to_string(),
                })
            );
        }
        other => unreachable!("expected roomSnapshot, got {other:?}"),
    }
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_second_tab_leaves_silently() {
    let store = MockRoomStore::new().with_room(TestRoom::new("R1"));
    let hub = Hub::start(&store);
    let mut watcher = hub.connect("w", "U1");
    let mut tab1 = hub.connect("t1", "U2");
    let mut tab2 = hub.connect("t2", "U2");

    watcher.join("R1", None).await;
    tab1.join("R1", None).await;
    tab2.join("R1", None).await;
    quiesce().await;

    let joined = watcher
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::UserJoined { .. }))
        .count();
    assert_eq!(joined, 1);
    assert_eq!(store.participant_writes(&RoomId::from("R1")).len(), 2);

    tab1.session.close().await;
    quiesce().await;
    assert!(watcher.drain().is_empty());

    tab2.session.close().await;
    quiesce().await;
    let events = watcher.drain();
    let left: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::UserLeft { user, .. } => Some(user.user_id().clone()),
            _ => None,
        })
        .collect();
    assert_eq!(left, vec![UserId::from("U2")]);
    assert!(events.iter().any(
        |e| matches!(e, ServerEvent::PresenceChanged { count, .. } if *count == 1)
    ));
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_document_burst_persists_last_snapshot_once() {
    let store = MockRoomStore::new().with_room(TestRoom::new("R1"));
    let hub = Hub::start(&store);
    let mut editor = hub.connect("e", "U1");
    let mut viewer = hub.connect("v", "U2");
    editor.join("R1", None).await;
    viewer.join("R1", None).await;

    for version in 1..=3 {
        editor
            .send(ClientEvent::DocumentChange {
                room_id: RoomId::from("R1"),
                delta: format!("v{version}"),
                language: "rust".to_string(),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // Every change is fanned out right away
    let updates: Vec<_> = viewer
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::DocumentUpdate { delta, .. } => Some(delta),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec!["v1", "v2", "v3"]);
    assert!(store.document_writes(&RoomId::from("R1")).is_empty());

    tokio::time::sleep(DEBOUNCE).await;
    assert_eq!(
        store.document_writes(&RoomId::from("R1")),
        vec![DocumentSnapshot {
            content: "v3".to_string(),
            language: "rust".to_string(),
        }]
    );

    // The editor never hears its own changes
    assert!(!editor
        .drain()
        .iter()
        .any(|e| matches!(e, ServerEvent::DocumentUpdate { .. })));
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_after_teardown_sees_latest_document() {
    let store = MockRoomStore::new()
        .with_room(TestRoom::new("R1"))
        .with_latency(StoreOp::PersistDocumentSnapshot, Duration::from_millis(300));
    let hub = Hub::start(&store);
    let mut editor = hub.connect("e", "U1");
    let mut next = hub.connect("n", "U2");
    editor.join("R1", None).await;

    editor
        .send(ClientEvent::DocumentChange {
            room_id: RoomId::from("R1"),
            delta: "fn main() {}".to_string(),
            language: "rust".to_string(),
        })
        .await;
    editor
        .send(ClientEvent::LeaveRoom {
            room_id: RoomId::from("R1"),
        })
        .await;
    // Teardown has started and the final write is still in the store
    quiesce().await;
    assert!(store.room(&RoomId::from("R1")).unwrap().document.is_none());

    match next.join("R1", None).await {
        ServerEvent::RoomSnapshot(snapshot) => assert_eq!(
            snapshot.document,
            Some(DocumentSnapshot {
                content: "fn main() {}".to_string(),
                language: "rust".to_string(),
            })
        ),
        other => unreachable!("expected roomSnapshot, got {other:?}"),
    }
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_cursor_updates_skip_sender() {
    let store = MockRoomStore::new().with_room(TestRoom::new("R1"));
    let hub = Hub::start(&store);
    let mut a = hub.connect("a", "U1");
    let mut b = hub.connect("b", "U2");
    a.join("R1", None).await;
    b.join("R1", None).await;
    quiesce().await;
    a.drain();

    a.send(ClientEvent::CursorChange {
        room_id: RoomId::from("R1"),
        position: common::types::CursorPosition {
            line: 3,
            column: 7,
            selection_end: None,
        },
    })
    .await;
    quiesce().await;

    assert!(b.drain().iter().any(|e| matches!(
        e,
        ServerEvent::CursorUpdate { user_id, position, .. }
            if user_id == &UserId::from("U1") && position.line == 3
    )));
    assert!(a.drain().is_empty());
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_chat_failure_reported_to_sender_only() {
    let store = MockRoomStore::new()
        .with_room(TestRoom::new("R1"))
        .failing(StoreOp::AppendMessage);
    let hub = Hub::start(&store);
    let mut a = hub.connect("a", "U1");
    let mut b = hub.connect("b", "U2");
    a.join("R1", None).await;
    b.join("R1", None).await;
    quiesce().await;
    a.drain();

    a.send(ClientEvent::SendMessage {
        room_id: RoomId::from("R1"),
        content: "hello".to_string(),
        kind: MessageKind::Text,
    })
    .await;
    quiesce().await;

    assert!(matches!(
        a.drain().as_slice(),
        [ServerEvent::Error { code, .. }] if code == "INTERNAL_ERROR"
    ));
    assert!(b.drain().is_empty());

    store.set_failing(StoreOp::AppendMessage, false);
    a.send(ClientEvent::SendMessage {
        room_id: RoomId::from("R1"),
        content: "  hello again  ".to_string(),
        kind: MessageKind::Code,
    })
    .await;
    quiesce().await;

    // Stored, then echoed to everyone including the sender
    for client in [&mut a, &mut b] {
        assert!(matches!(
            client.drain().as_slice(),
            [ServerEvent::NewMessage(m)] if m.content == "hello again" && m.kind == MessageKind::Code
        ));
    }
    assert_eq!(store.messages(&RoomId::from("R1")).len(), 1);
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_signals_stay_inside_the_room() {
    let store = MockRoomStore::new()
        .with_room(TestRoom::new("R1"))
        .with_room(TestRoom::new("R2"));
    let hub = Hub::start(&store);
    let mut a = hub.connect("a", "U1");
    let mut b = hub.connect("b", "U2");
    let mut c = hub.connect("c", "U3");
    a.join("R1", None).await;
    b.join("R1", None).await;
    c.join("R2", None).await;
    quiesce().await;
    b.drain();

    a.send(ClientEvent::Offer {
        room_id: RoomId::from("R1"),
        target: ConnectionId::from("c"),
        payload: SessionDescription::offer("sdp-to-c"),
    })
    .await;
    a.send(ClientEvent::IceCandidate {
        room_id: RoomId::from("R1"),
        target: ConnectionId::from("b"),
        payload: IceCandidate::new("candidate:1"),
    })
    .await;
    a.send(ClientEvent::RetryRequest {
        room_id: RoomId::from("R1"),
        target: ConnectionId::from("b"),
    })
    .await;
    quiesce().await;

    assert!(c.drain().is_empty());
    assert_eq!(
        b.drain(),
        vec![
            ServerEvent::IceCandidate {
                sender: ConnectionId::from("a"),
                payload: IceCandidate::new("candidate:1"),
            },
            ServerEvent::ConnectionRetry {
                sender: ConnectionId::from("a"),
            },
        ]
    );
    hub.stop();
}

#[tokio::test(start_paused = true)]
async fn test_shared_member_skips_password() {
    let store = MockRoomStore::new().with_room(
        TestRoom::new("R1")
            .private()
            .with_password("p1")
            .shared_with("U2"),
    );
    let hub = Hub::start(&store);
    let mut member = hub.connect("m", "U2");
    let mut stranger = hub.connect("s", "U3");

    assert!(matches!(
        member.join("R1", Some("wrong")).await,
        ServerEvent::RoomSnapshot(_)
    ));
    assert_eq!(rejection_code(&stranger.join("R1", None).await), "PASSWORD_REQUIRED");
    hub.stop();
}
