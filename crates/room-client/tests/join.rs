//! Join Orchestrator tests against a scripted hub transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::protocol::ClientEvent;
use common::secret::RoomPassword;
use common::types::RoomId;
use hub_test_utils::{JoinReply, MockHubTransport};
use room_client::config::JoinConfig;
use room_client::errors::JoinError;
use room_client::join::{JoinOrchestrator, JoinOutcome, JoinState};
use std::sync::Arc;
use std::time::Duration;

fn config() -> JoinConfig {
    JoinConfig {
        attempt_timeout: Duration::from_secs(1),
        max_attempts: 3,
        backoff: Duration::from_millis(100),
    }
}

fn orchestrator(transport: &MockHubTransport) -> Arc<JoinOrchestrator> {
    Arc::new(JoinOrchestrator::new(Arc::new(transport.clone()), config()))
}

async fn wait_for_state(
    orchestrator: &JoinOrchestrator,
    room: &RoomId,
    pred: impl Fn(&JoinState) -> bool,
) {
    let mut rx = orchestrator.subscribe(room).await;
    rx.wait_for(|state| pred(state)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_join_twice_in_flight_registers_once() {
    let transport = MockHubTransport::new("c1")
        .with_join_reply(JoinReply::SnapshotAfter(Duration::from_millis(200)));
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let room = room.clone();
        tokio::spawn(async move { orchestrator.join(&room, None).await })
    };
    wait_for_state(&orchestrator, &room, |s| {
        matches!(s, JoinState::Registering { .. })
    })
    .await;

    let second = orchestrator.join(&room, None).await.unwrap();
    assert_eq!(second, JoinOutcome::AlreadyInFlight);

    let first = first.await.unwrap().unwrap();
    let JoinOutcome::Joined(snapshot) = first else {
        unreachable!("expected a joined outcome");
    };
    assert_eq!(snapshot.room_id, room);
    assert_eq!(transport.join_requests(&room), 1);
    assert_eq!(transport.authorize_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_password_prompt_then_join() {
    let transport = MockHubTransport::new("c2")
        .with_authorize_result(Err(JoinError::PasswordRequired))
        .with_authorize_result(Err(JoinError::InvalidPassword));
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let result = orchestrator.join(&room, None).await;
    assert_eq!(result, Err(JoinError::PasswordRequired));
    assert_eq!(
        orchestrator.state(&room).await,
        JoinState::PasswordPrompt { invalid: false }
    );

    let result = orchestrator
        .join(&room, Some(RoomPassword::from("wrong")))
        .await;
    assert_eq!(result, Err(JoinError::InvalidPassword));
    assert_eq!(
        orchestrator.state(&room).await,
        JoinState::PasswordPrompt { invalid: true }
    );

    let result = orchestrator
        .join(&room, Some(RoomPassword::from("p1")))
        .await
        .unwrap();
    assert!(matches!(result, JoinOutcome::Joined(_)));
    assert!(matches!(
        orchestrator.state(&room).await,
        JoinState::Joined(_)
    ));

    // Authorization failures are never retried
    let calls = transport.authorize_calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls.get(1).unwrap().1.as_deref(), Some("wrong"));
    assert_eq!(calls.get(2).unwrap().1.as_deref(), Some("p1"));
    assert_eq!(transport.join_requests(&room), 1);

    // The password travels with joinRoom too
    let sent = transport.sent();
    assert!(matches!(
        sent.first(),
        Some(ClientEvent::JoinRoom { password: Some(p), .. }) if p.expose_secret() == "p1"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_attempts_are_retried() {
    let transport = MockHubTransport::new("c3")
        .with_join_reply(JoinReply::Silent)
        .with_join_reply(JoinReply::Silent)
        .with_join_reply(JoinReply::Snapshot);
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let outcome = orchestrator.join(&room, None).await.unwrap();
    assert!(matches!(outcome, JoinOutcome::Joined(_)));
    assert_eq!(transport.join_requests(&room), 3);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_with_timeout() {
    let transport = MockHubTransport::new("c4")
        .with_join_reply(JoinReply::Silent)
        .with_join_reply(JoinReply::Silent)
        .with_join_reply(JoinReply::Silent);
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let start = tokio::time::Instant::now();
    let result = orchestrator.join(&room, None).await;

    assert_eq!(result, Err(JoinError::Timeout));
    assert_eq!(
        orchestrator.state(&room).await,
        JoinState::Failed(JoinError::Timeout)
    );
    assert_eq!(transport.join_requests(&room), 3);
    // Three deadlines plus two backoffs
    assert!(start.elapsed() >= Duration::from_millis(3200));
    // The hub may have registered one of the silent attempts
    assert!(matches!(
        transport.sent().last(),
        Some(ClientEvent::LeaveRoom { room_id }) if room_id == &room
    ));
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_is_not_retried() {
    let transport = MockHubTransport::new("c5").with_authorize_result(Err(JoinError::Forbidden));
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("SECRET");

    assert_eq!(
        orchestrator.join(&room, None).await,
        Err(JoinError::Forbidden)
    );
    assert_eq!(transport.authorize_calls().len(), 1);
    assert_eq!(transport.join_requests(&room), 0);
    assert_eq!(
        orchestrator.state(&room).await,
        JoinState::Failed(JoinError::Forbidden)
    );
}

#[tokio::test(start_paused = true)]
async fn test_hub_rejection_maps_to_error() {
    let transport = MockHubTransport::new("c6")
        .with_join_reply(JoinReply::Reject("ROOM_NOT_FOUND".to_string()));
    let orchestrator = orchestrator(&transport);

    let result = orchestrator.join(&RoomId::from("GONE"), None).await;
    assert_eq!(result, Err(JoinError::RoomNotFound));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_discards_late_snapshot() {
    let transport = MockHubTransport::new("c7")
        .with_join_reply(JoinReply::SnapshotAfter(Duration::from_millis(500)));
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let pending = {
        let orchestrator = Arc::clone(&orchestrator);
        let room = room.clone();
        tokio::spawn(async move { orchestrator.join(&room, None).await })
    };
    wait_for_state(&orchestrator, &room, |s| {
        matches!(s, JoinState::Registering { .. })
    })
    .await;

    orchestrator.cancel(&room).await;
    assert_eq!(pending.await.unwrap(), Err(JoinError::Cancelled));
    assert_eq!(orchestrator.state(&room).await, JoinState::Idle);

    // joinRoom already went out, so the hub is told to drop the connection
    let leaves: Vec<_> = transport
        .sent()
        .into_iter()
        .filter(|e| matches!(e, ClientEvent::LeaveRoom { room_id } if room_id == &room))
        .collect();
    assert_eq!(leaves.len(), 1);

    // The snapshot still arrives, but belongs to a superseded attempt
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(orchestrator.state(&room).await, JoinState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_join_room_sends_nothing() {
    let transport = MockHubTransport::new("c7b").with_authorize_delay(Duration::from_millis(500));
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let pending = {
        let orchestrator = Arc::clone(&orchestrator);
        let room = room.clone();
        tokio::spawn(async move { orchestrator.join(&room, None).await })
    };
    wait_for_state(&orchestrator, &room, |s| {
        matches!(s, JoinState::Authorizing { .. })
    })
    .await;

    orchestrator.cancel(&room).await;
    assert_eq!(pending.await.unwrap(), Err(JoinError::Cancelled));
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_join_returns_room_to_idle() {
    let transport = MockHubTransport::new("c7c").with_authorize_delay(Duration::from_millis(500));
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.join(&room, None),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(orchestrator.state(&room).await, JoinState::Idle);
    assert!(transport.sent().is_empty());

    let outcome = orchestrator.join(&room, None).await.unwrap();
    assert!(matches!(outcome, JoinOutcome::Joined(_)));
    assert_eq!(transport.authorize_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_join_after_join_room_leaves() {
    let transport = MockHubTransport::new("c7d").with_join_reply(JoinReply::Silent);
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.join(&room, None),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(orchestrator.state(&room).await, JoinState::Idle);

    // leaveRoom goes out from a spawned task
    tokio::task::yield_now().await;
    assert!(matches!(
        transport.sent().last(),
        Some(ClientEvent::LeaveRoom { room_id }) if room_id == &room
    ));
}

#[tokio::test(start_paused = true)]
async fn test_leave_sends_leave_room() {
    let transport = MockHubTransport::new("c8");
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    orchestrator.join(&room, None).await.unwrap();
    orchestrator.leave(&room).await.unwrap();

    assert_eq!(orchestrator.state(&room).await, JoinState::Idle);
    assert!(matches!(
        transport.sent().last(),
        Some(ClientEvent::LeaveRoom { room_id }) if room_id == &room
    ));
}

#[tokio::test(start_paused = true)]
async fn test_closed_transport_surfaces_transport_error() {
    let transport = MockHubTransport::new("c9");
    transport.close();
    let orchestrator = orchestrator(&transport);

    let result = orchestrator.join(&RoomId::from("R1"), None).await;
    assert!(matches!(result, Err(JoinError::Transport(_))));
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_see_the_state_machine() {
    let transport = MockHubTransport::new("c10");
    let orchestrator = orchestrator(&transport);
    let room = RoomId::from("R1");

    let mut rx = orchestrator.subscribe(&room).await;
    assert_eq!(*rx.borrow_and_update(), JoinState::Idle);

    orchestrator.join(&room, None).await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert!(matches!(*rx.borrow_and_update(), JoinState::Joined(_)));
}
