//! Cluster Integration Tests
//!
//! Several nodes in one process share an in-memory broker and presence
//! store, the same way gateways share Redis in production.
//!
//! Run with: cargo test -p integration-tests --test cluster_tests

use std::collections::HashSet;
use std::time::Duration;

use integration_tests::TestCluster;
use roomcast_core::{Envelope, MemoryPeer};
use serde_json::{json, Value};

const CHAT: &str = "/chat";

async fn send(peer: &MemoryPeer, event: &str, data: Value) {
    peer.send_envelope(&Envelope::new(event, data)).await;
}

async fn recv(peer: &mut MemoryPeer) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), peer.next_envelope())
        .await
        .expect("timed out waiting for a message")
        .expect("peer closed")
}

/// Let in-flight broker messages land before asserting silence
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

async fn join(peer: &mut MemoryPeer, room: &str) {
    send(peer, "room.join", json!(room)).await;
    let reply = recv(peer).await;
    assert_eq!(reply.event, "room.joined");
}

// ============================================================================
// Fan-out Tests
// ============================================================================

#[tokio::test]
async fn test_room_message_crosses_nodes() {
    let cluster = TestCluster::start(2, CHAT).await.unwrap();

    let (_alice, mut alice) = cluster.connect(0, CHAT, "alice").await.unwrap();
    let (_bob, mut bob) = cluster.connect(1, CHAT, "bob").await.unwrap();
    let (_carol, mut carol) = cluster.connect(1, CHAT, "carol").await.unwrap();

    join(&mut alice, "general").await;
    join(&mut bob, "general").await;

    send(
        &alice,
        "room.message",
        json!({ "room": "general", "event": "chat", "payload": "hello" }),
    )
    .await;

    let msg = recv(&mut bob).await;
    assert_eq!(msg.event, "chat");
    assert_eq!(msg.ns.as_deref(), Some(CHAT));
    assert_eq!(msg.data["room"], "general");
    assert_eq!(msg.data["userId"], "alice");
    assert_eq!(msg.data["payload"], "hello");

    settle().await;
    assert!(alice.drain_envelopes().is_empty());
    assert!(carol.drain_envelopes().is_empty());

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_local_recipient_gets_one_copy() {
    let cluster = TestCluster::start(2, CHAT).await.unwrap();

    let (_alice, alice) = cluster.connect(0, CHAT, "alice").await.unwrap();
    let (_bob, mut bob) = cluster.connect(0, CHAT, "bob").await.unwrap();
    let (_carol, mut carol) = cluster.connect(1, CHAT, "carol").await.unwrap();

    send(&alice, "namespace.message", json!({ "payload": 1 })).await;

    assert_eq!(recv(&mut bob).await.data["payload"], 1);
    assert_eq!(recv(&mut carol).await.data["payload"], 1);

    // The publishing node ignores its own broker echo
    settle().await;
    assert!(bob.drain_envelopes().is_empty());
    assert!(carol.drain_envelopes().is_empty());

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_user_message_reaches_every_node() {
    let cluster = TestCluster::start(3, CHAT).await.unwrap();

    let (_alice, alice) = cluster.connect(0, CHAT, "alice").await.unwrap();
    let (_bob_a, mut bob_a) = cluster.connect(1, CHAT, "bob").await.unwrap();
    let (_bob_b, mut bob_b) = cluster.connect(2, CHAT, "bob").await.unwrap();
    let (_carol, mut carol) = cluster.connect(2, CHAT, "carol").await.unwrap();

    send(
        &alice,
        "user.message",
        json!({ "userId": "bob", "event": "dm", "payload": { "text": "psst" } }),
    )
    .await;

    for peer in [&mut bob_a, &mut bob_b] {
        let msg = recv(peer).await;
        assert_eq!(msg.event, "dm");
        assert_eq!(msg.data["payload"]["text"], "psst");
    }

    settle().await;
    assert!(carol.drain_envelopes().is_empty());

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_global_broadcast_reaches_all_nodes() {
    let cluster = TestCluster::start(2, CHAT).await.unwrap();

    let (_a, mut peer_a) = cluster.connect(0, CHAT, "alice").await.unwrap();
    let (_b, mut peer_b) = cluster.connect(1, CHAT, "bob").await.unwrap();

    let local = cluster.nodes[0]
        .broadcast_global("maintenance", json!({ "in": 5 }), None, None)
        .await;
    assert_eq!(local, 1);

    for peer in [&mut peer_a, &mut peer_b] {
        let msg = recv(peer).await;
        assert_eq!(msg.event, "maintenance");
        assert_eq!(msg.data["in"], 5);
    }

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_to_unknown_namespace_is_dropped() {
    let cluster = TestCluster::start(2, CHAT).await.unwrap();

    let (_a, mut peer_a) = cluster.connect(1, CHAT, "alice").await.unwrap();

    let local = cluster.nodes[0]
        .broadcast_global("ping", json!(null), None, Some("/elsewhere"))
        .await;
    assert_eq!(local, 0);

    settle().await;
    assert!(peer_a.drain_envelopes().is_empty());

    cluster.shutdown().await.unwrap();
}

// ============================================================================
// Presence Tests
// ============================================================================

#[tokio::test]
async fn test_presence_spans_nodes() {
    let cluster = TestCluster::start(2, CHAT).await.unwrap();

    let (alice, _alice_peer) = cluster.connect(0, CHAT, "alice").await.unwrap();
    let (bob, _bob_peer) = cluster.connect(1, CHAT, "bob").await.unwrap();

    let expected: HashSet<String> = [alice.id().to_string(), bob.id().to_string()].into();
    for node in &cluster.nodes {
        let clients: HashSet<String> = node.namespace_clients(CHAT).await.into_iter().collect();
        assert_eq!(clients, expected);
    }

    // Local registries only know their own connections
    assert_eq!(
        cluster.namespace(0, CHAT).unwrap().local_clients(),
        vec![alice.id().to_string()]
    );

    let meta = cluster.presence.client(CHAT, bob.id()).unwrap();
    assert_eq!(meta.server_id, "node-1");
    assert_eq!(meta.user_id.as_deref(), Some("bob"));

    cluster.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_closed_node_stops_receiving() {
    let cluster = TestCluster::start(2, CHAT).await.unwrap();

    let (_a, alice) = cluster.connect(0, CHAT, "alice").await.unwrap();
    let (_b, _bob) = cluster.connect(1, CHAT, "bob").await.unwrap();

    cluster.nodes[1].close().await.unwrap();
    assert_eq!(cluster.broker.subscriber_count("roomcast:ns:/chat"), 1);

    // Publishing into a cluster with a departed node still works
    send(&alice, "namespace.message", json!({ "payload": "anyone?" })).await;
    settle().await;

    cluster.shutdown().await.unwrap();
    assert_eq!(cluster.broker.subscriber_count("roomcast:ns:/chat"), 0);
}
