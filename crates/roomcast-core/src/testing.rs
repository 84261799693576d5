//! Test helpers shared by unit tests

use crate::connection::Connection;
use crate::events::DEFAULT_MAX_LISTENERS;
use crate::transport::memory::memory_transport;
use crate::transport::{Handshake, Transport};
use std::sync::{Arc, Weak};

/// Parse `/path?key=value&...` into a handshake
pub(crate) fn handshake(url: &str) -> Handshake {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .fold(Handshake::new(path), |handshake, (key, value)| {
            handshake.with_query(key, value)
        })
}

/// Connection that belongs to no namespace, over a throwaway transport
pub(crate) fn detached_connection(url: &str) -> Arc<Connection> {
    let (transport, _events, _peer) = memory_transport();
    let handshake = handshake(url);
    Connection::new(
        Arc::from(handshake.path.as_str()),
        Weak::new(),
        transport,
        handshake,
        DEFAULT_MAX_LISTENERS,
    )
}

/// Connection that belongs to no namespace, over a given transport
pub(crate) fn detached_connection_with(
    namespace: &str,
    transport: Arc<dyn Transport>,
) -> Arc<Connection> {
    Connection::new(
        Arc::from(namespace),
        Weak::new(),
        transport,
        Handshake::new(namespace),
        DEFAULT_MAX_LISTENERS,
    )
}

/// Node without broker, state adapter or heartbeat ticker
pub(crate) async fn node() -> Arc<crate::Node> {
    crate::Node::builder()
        .heartbeat_interval(None)
        .build()
        .await
        .unwrap()
}

/// Accept an in-memory connection into a node
pub(crate) async fn connect(
    node: &crate::Node,
    url: &str,
) -> (Arc<Connection>, crate::transport::memory::MemoryPeer) {
    let (transport, inbound, peer) = memory_transport();
    let conn = node
        .accept(transport, inbound, handshake(url))
        .await
        .unwrap();
    (conn, peer)
}

/// Poll a condition until it holds, failing after one second
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not met within one second");
}
