//! End-to-end relay scenarios over the in-memory transport.

use beacon_protocol::{Message, MessageType};
use std::sync::Arc;
use std::time::Duration;
use tenvis_beacon_core::{
    CloseReason, ConnectionLifecycle, LifecycleConfig, MessageRouter, SessionSummary,
    DEFAULT_ROOM,
};
use tenvis_beacon_transport::memory::{self, MemoryClient};
use tokio::task::JoinHandle;

struct Peer {
    client: MemoryClient,
    session: JoinHandle<SessionSummary>,
    identity: String,
}

fn connect(router: &Arc<MessageRouter>) -> (MemoryClient, JoinHandle<SessionSummary>) {
    let (connection, client) = memory::pair();
    let lifecycle =
        ConnectionLifecycle::new(connection, Arc::clone(router), LifecycleConfig::default());
    (client, tokio::spawn(lifecycle.run()))
}

async fn next(client: &mut MemoryClient) -> Message {
    tokio::time::timeout(Duration::from_secs(1), client.recv_message())
        .await
        .expect("timed out waiting for message")
        .expect("connection closed")
}

async fn identified(router: &Arc<MessageRouter>, seed: &str) -> Peer {
    let (mut client, session) = connect(router);
    assert!(client.send(&Message::init(seed)));

    let response = next(&mut client).await;
    assert_eq!(response.kind, MessageType::Init);
    let identity = response.client_id.expect("init response carries clientId");

    Peer {
        client,
        session,
        identity,
    }
}

async fn join(peer: &mut Peer, room: &str) -> Vec<String> {
    assert!(peer.client.send(&Message::join(room)));
    let response = next(&mut peer.client).await;
    assert_eq!(response.kind, MessageType::Join);
    response.client_ids.expect("join response carries clientIds")
}

async fn disconnect(peer: Peer) -> SessionSummary {
    let Peer {
        mut client,
        session,
        ..
    } = peer;
    client.disconnect();
    session.await.expect("session task panicked")
}

/// Give routed deliveries a chance to land before asserting absence.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn room_signaling_and_teardown() {
    let router = Arc::new(MessageRouter::new());

    let mut a = identified(&router, "abc").await;
    assert_eq!(a.identity.len(), 9);
    assert!(a.identity.bytes().all(|b| b.is_ascii_digit()));
    assert!(!a.identity.starts_with('0'));

    assert_eq!(join(&mut a, "r1").await, vec![a.identity.clone()]);

    let mut b = identified(&router, "def").await;
    let mut members = join(&mut b, "r1").await;
    members.sort();
    let mut expected = vec![a.identity.clone(), b.identity.clone()];
    expected.sort();
    assert_eq!(members, expected);

    let message = Message::room("r1", "hi");
    assert!(a.client.send(&message));
    assert_eq!(next(&mut b.client).await, message);
    settle().await;
    assert!(a.client.try_recv_message().is_none());

    let summary = disconnect(a).await;
    assert_eq!(summary.reason, CloseReason::PeerClosed);
    assert_eq!(
        router
            .rooms()
            .members_of("r1")
            .into_iter()
            .map(|id| id.into_string())
            .collect::<Vec<_>>(),
        vec![b.identity.clone()]
    );

    disconnect(b).await;
    assert!(!router.rooms().room_exists("r1"));
    assert!(!router.rooms().room_exists(DEFAULT_ROOM));
    assert_eq!(router.rooms().stats().connection_count, 0);
}

#[tokio::test]
async fn global_reaches_everyone_but_sender() {
    let router = Arc::new(MessageRouter::new());
    let mut a = identified(&router, "a").await;
    let mut b = identified(&router, "b").await;
    let mut c = identified(&router, "c").await;
    join(&mut c, "side").await;

    let message = Message::global("announcement");
    assert!(a.client.send(&message));

    assert_eq!(next(&mut b.client).await, message);
    assert_eq!(next(&mut c.client).await, message);
    settle().await;
    assert!(a.client.try_recv_message().is_none());
    assert!(c.client.try_recv_message().is_none());
}

#[tokio::test]
async fn private_message_and_unknown_target() {
    let router = Arc::new(MessageRouter::new());
    let mut a = identified(&router, "a").await;
    let mut b = identified(&router, "b").await;

    let offer = Message::private(b.identity.as_str(), serde_json::json!({"sdp": "v=0"}));
    assert!(a.client.send(&offer));
    assert_eq!(next(&mut b.client).await, offer);

    assert!(a.client.send(&Message::private("000000000", "lost")));
    settle().await;
    assert!(a.client.try_recv_message().is_none());
    assert!(b.client.try_recv_message().is_none());

    // The sender is still usable after a miss
    let reply = Message::private(a.identity.as_str(), "answer");
    assert!(b.client.send(&reply));
    assert_eq!(next(&mut a.client).await, reply);
}

#[tokio::test]
async fn dead_room_member_is_evicted() {
    let router = Arc::new(MessageRouter::new());
    let mut a = identified(&router, "a").await;
    let mut b = identified(&router, "b").await;
    let mut c = identified(&router, "c").await;
    for peer in [&mut a, &mut b, &mut c] {
        join(peer, "r1").await;
    }

    b.client.break_writes();
    assert!(a.client.send(&Message::room("r1", "hi")));
    assert_eq!(next(&mut c.client).await, Message::room("r1", "hi"));

    let summary = tokio::time::timeout(Duration::from_secs(1), b.session)
        .await
        .expect("dead member not closed")
        .expect("session task panicked");
    assert_eq!(summary.reason, CloseReason::WriterStopped);
    assert_eq!(router.rooms().member_count("r1"), 2);
}
