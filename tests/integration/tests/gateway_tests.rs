//! Gateway Integration Tests
//!
//! End-to-end tests over real sockets: a gateway is served on a loopback
//! port and driven with a WebSocket client and an HTTP client.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::time::Duration;

use integration_tests::{auth_config, test_config, token_for, TestGateway};
use reqwest::StatusCode;
use serde_json::json;

/// Poll until the node has registered `count` connections
async fn wait_for_connections(gateway: &TestGateway, count: usize) {
    for _ in 0..100 {
        if gateway.node.stats().connections == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} connections");
}

// ============================================================================
// HTTP Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let gateway = TestGateway::start(test_config(&["/"])).await.unwrap();

    let (status, body) = gateway.get_json("/health").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["nodeId"], gateway.node.id());
    assert_eq!(body["connections"], 0);

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stats_and_clients() {
    let gateway = TestGateway::start(test_config(&["/", "/chat"])).await.unwrap();

    let _client = gateway.connect("/chat").await.unwrap();
    wait_for_connections(&gateway, 1).await;

    let (status, stats) = gateway.get_json("/stats").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["connections"], 1);
    assert_eq!(stats["namespaces"].as_array().unwrap().len(), 2);

    let (status, clients) = gateway.get_json("/clients?ns=/chat").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(clients["namespace"], "/chat");
    assert_eq!(clients["clients"].as_array().unwrap().len(), 1);

    let (status, error) = gateway.get_json("/clients?ns=/missing").await.unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["code"], "NOT_FOUND");

    gateway.shutdown().await.unwrap();
}

// ============================================================================
// Protocol Tests
// ============================================================================

#[tokio::test]
async fn test_room_flow_over_websocket() {
    let gateway = TestGateway::start(test_config(&["/chat"])).await.unwrap();

    let mut alice = gateway.connect("/chat").await.unwrap();
    let mut bob = gateway.connect("/chat").await.unwrap();
    let mut carol = gateway.connect("/chat").await.unwrap();
    wait_for_connections(&gateway, 3).await;

    for client in [&mut alice, &mut bob] {
        client.send("room.join", json!("general")).await.unwrap();
        let reply = client.recv().await.unwrap();
        assert_eq!(reply.event, "room.joined");
        assert_eq!(reply.ns.as_deref(), Some("/chat"));
        assert_eq!(reply.data["room"], "general");
    }

    alice
        .send(
            "room.message",
            json!({ "room": "general", "payload": { "text": "hi" } }),
        )
        .await
        .unwrap();

    let msg = bob.recv().await.unwrap();
    assert_eq!(msg.event, "room.message");
    assert_eq!(msg.data["payload"]["text"], "hi");

    assert!(alice.is_silent_for(Duration::from_millis(100)).await);
    assert!(carol.is_silent_for(Duration::from_millis(100)).await);

    bob.send("room.leave", json!("general")).await.unwrap();
    assert_eq!(bob.recv().await.unwrap().event, "room.left");

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bad_frames_answer_error() {
    let gateway = TestGateway::start(test_config(&["/"])).await.unwrap();

    let mut client = gateway.connect("/").await.unwrap();

    client.send_text("not json").await.unwrap();
    let reply = client.recv().await.unwrap();
    assert_eq!(reply.event, "error");
    assert_eq!(reply.data["code"], "MALFORMED_MESSAGE");

    client.send("room.join", json!({ "nope": true })).await.unwrap();
    let reply = client.recv().await.unwrap();
    assert_eq!(reply.event, "error");
    assert_eq!(reply.data["code"], "INVALID_PAYLOAD");

    // Still usable afterwards
    client.send("room.join", json!("lobby")).await.unwrap();
    assert_eq!(client.recv().await.unwrap().event, "room.joined");

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let gateway = TestGateway::start(test_config(&["/"])).await.unwrap();

    let client = gateway.connect("/").await.unwrap();
    wait_for_connections(&gateway, 1).await;

    client.close().await.unwrap();
    wait_for_connections(&gateway, 0).await;

    gateway.shutdown().await.unwrap();
}

// ============================================================================
// Admission Tests
// ============================================================================

#[tokio::test]
async fn test_unknown_namespace_is_closed() {
    let gateway = TestGateway::start(test_config(&["/chat"])).await.unwrap();

    let mut client = gateway.connect("/nowhere").await.unwrap();
    let closed = client.recv_close().await.unwrap();
    assert_eq!(closed.code, 4004);
    assert_eq!(closed.reason, "namespace not found");

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_token_required() {
    let gateway = TestGateway::start(auth_config(&["/"])).await.unwrap();

    let mut anonymous = gateway.connect("/").await.unwrap();
    assert_eq!(anonymous.recv_close().await.unwrap().code, 4003);

    let mut forged = gateway.connect("/?token=not.a.jwt").await.unwrap();
    assert_eq!(forged.recv_close().await.unwrap().code, 4003);

    assert_eq!(gateway.node.stats().connections, 0);

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_user_message_routes_by_token_subject() {
    let gateway = TestGateway::start(auth_config(&["/"])).await.unwrap();

    let mut alice = gateway
        .connect(&format!("/?token={}", token_for("alice")))
        .await
        .unwrap();
    let mut bob = gateway
        .connect(&format!("/?token={}", token_for("bob")))
        .await
        .unwrap();
    wait_for_connections(&gateway, 2).await;

    alice
        .send("user.message", json!({ "userId": "bob", "payload": "hey" }))
        .await
        .unwrap();

    let msg = bob.recv().await.unwrap();
    assert_eq!(msg.event, "user.message");
    assert_eq!(msg.data["userId"], "alice");
    assert_eq!(msg.data["payload"], "hey");

    assert!(alice.is_silent_for(Duration::from_millis(100)).await);

    gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let mut config = test_config(&["/"]);
    config.rate_limit.per_second = 1;
    config.rate_limit.burst = 1;
    let gateway = TestGateway::start(config).await.unwrap();

    let _first = gateway.connect("/").await.unwrap();
    wait_for_connections(&gateway, 1).await;

    let mut second = gateway.connect("/").await.unwrap();
    assert_eq!(second.recv_close().await.unwrap().code, 4003);

    gateway.shutdown().await.unwrap();
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_clients_and_listener() {
    let gateway = TestGateway::start(test_config(&["/"])).await.unwrap();

    let mut client = gateway.connect("/").await.unwrap();
    wait_for_connections(&gateway, 1).await;

    gateway.shutdown().await.unwrap();

    let closed = client.recv_close().await.unwrap();
    assert_eq!(closed.code, 4005);
    assert!(gateway.connect("/").await.is_err());

    // Idempotent
    gateway.shutdown().await.unwrap();
}
