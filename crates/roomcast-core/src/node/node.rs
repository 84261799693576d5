//! Node: owner of namespaces, heartbeat and the global broker channel

use super::builder::NodeBuilder;
use super::path::normalize_path;
use crate::adapters::{AdapterError, BrokerAdapter, BrokerListener, StateAdapter};
use crate::admission::AdmissionError;
use crate::connection::Connection;
use crate::namespace::{Namespace, NamespaceOptions, NamespaceStats, Scope};
use crate::protocol::{BrokerEnvelope, CloseCode, ALL_NAMESPACES, GLOBAL_CHANNEL};
use crate::transport::{Acceptor, Handshake, Transport, TransportError, TransportEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

/// Default heartbeat period
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Node configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    /// Heartbeat period; `None` disables the background ticker
    pub heartbeat_interval: Option<Duration>,
    /// Options applied to every namespace
    pub namespace: NamespaceOptions,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            namespace: NamespaceOptions::default(),
        }
    }
}

/// Error type for node lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Node is closed")]
    Closed,

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Acceptor shutdown failed: {0}")]
    Acceptor(#[from] TransportError),
}

/// Error type for [`Node::accept`]
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Admission failed: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Node is closed")]
    NodeClosed,
}

/// Point-in-time counters of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub created_at: DateTime<Utc>,
    pub connections: usize,
    pub namespaces: Vec<NamespaceStats>,
}

/// A server node
pub struct Node {
    id: Arc<str>,
    created_at: DateTime<Utc>,
    weak: Weak<Node>,
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
    broker: Option<Arc<dyn BrokerAdapter>>,
    state_adapter: Option<Arc<dyn StateAdapter>>,
    options: NodeOptions,
    global_listener: Mutex<Option<BrokerListener>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    acceptor: Mutex<Option<Arc<dyn Acceptor>>>,
    closed: AtomicBool,
    span: tracing::Span,
}

impl Node {
    /// Start configuring a node
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    pub(crate) fn new(
        id: String,
        broker: Option<Arc<dyn BrokerAdapter>>,
        state_adapter: Option<Arc<dyn StateAdapter>>,
        options: NodeOptions,
    ) -> Arc<Self> {
        let span = tracing::info_span!("node", node_id = %id);

        Arc::new_cyclic(|weak| Self {
            id: Arc::from(id),
            created_at: Utc::now(),
            weak: weak.clone(),
            namespaces: RwLock::new(HashMap::new()),
            broker,
            state_adapter,
            options,
            global_listener: Mutex::new(None),
            heartbeat: Mutex::new(None),
            acceptor: Mutex::new(None),
            closed: AtomicBool::new(false),
            span,
        })
    }

    /// Get the node ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the options the node was built with
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Check if the node has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get or create a namespace
    pub async fn of(&self, path: &str) -> Result<Arc<Namespace>, NodeError> {
        if self.is_closed() {
            return Err(NodeError::Closed);
        }

        let name = normalize_path(path);
        if let Some(namespace) = self.namespaces.read().get(&name) {
            return Ok(namespace.clone());
        }

        let (namespace, created) = {
            let mut namespaces = self.namespaces.write();
            // close() flags before draining under this lock
            if self.is_closed() {
                return Err(NodeError::Closed);
            }
            match namespaces.get(&name) {
                Some(namespace) => (namespace.clone(), false),
                None => {
                    let namespace = Namespace::new(
                        &name,
                        self.id.clone(),
                        self.broker.clone(),
                        self.state_adapter.clone(),
                        self.options.namespace,
                    );
                    namespaces.insert(name.clone(), namespace.clone());
                    (namespace, true)
                }
            }
        };

        if created {
            namespace.subscribe_broker().await;
            tracing::info!(node_id = %self.id, ns = %name, "Namespace created");
        }
        Ok(namespace)
    }

    /// Look up an existing namespace
    pub fn namespace(&self, path: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().get(&normalize_path(path)).cloned()
    }

    /// All namespaces
    pub fn namespaces(&self) -> Vec<Arc<Namespace>> {
        let mut namespaces: Vec<Arc<Namespace>> = self.namespaces.read().values().cloned().collect();
        namespaces.sort_by(|a, b| a.name().cmp(b.name()));
        namespaces
    }

    /// Destroy a namespace and forget it
    pub async fn remove_namespace(&self, path: &str) -> bool {
        let removed = self.namespaces.write().remove(&normalize_path(path));
        match removed {
            Some(namespace) => {
                namespace.destroy().await;
                true
            }
            None => false,
        }
    }

    /// Accept a transport into the namespace selected by the handshake path
    ///
    /// Unknown namespaces are closed with [`CloseCode::NamespaceNotFound`];
    /// rejected admissions with [`CloseCode::Forbidden`].
    pub async fn accept(
        &self,
        transport: Arc<dyn Transport>,
        inbound: tokio::sync::mpsc::Receiver<TransportEvent>,
        handshake: Handshake,
    ) -> Result<Arc<Connection>, AcceptError> {
        if self.is_closed() {
            let code = CloseCode::GoingAway;
            let _ = transport.close(code.as_u16(), code.reason()).await;
            return Err(AcceptError::NodeClosed);
        }

        let path = normalize_path(&handshake.path);
        let Some(namespace) = self.namespace(&path) else {
            tracing::info!(node_id = %self.id, path = %path, "Connection to unknown namespace");
            let code = CloseCode::NamespaceNotFound;
            let _ = transport.close(code.as_u16(), code.reason()).await;
            return Err(AcceptError::NamespaceNotFound(path));
        };

        let conn = namespace.new_connection(transport, handshake);
        namespace.add_connection(conn.clone(), inbound).await?;
        Ok(conn)
    }

    /// Emit to every namespace, or to one, on every node
    ///
    /// `target` of `None` or `"*"` addresses all namespaces. Returns the
    /// number of local connections written to.
    pub async fn broadcast_global(
        &self,
        event: &str,
        data: Value,
        sender: Option<&str>,
        target: Option<&str>,
    ) -> usize {
        let target = match target {
            None | Some(ALL_NAMESPACES) => ALL_NAMESPACES.to_string(),
            Some(path) => normalize_path(path),
        };

        let delivered = self.deliver_global(&target, event, &data, sender).await;

        if let Some(broker) = &self.broker {
            let envelope =
                BrokerEnvelope::broadcast(&*self.id, target, event, data).excluding(sender);
            match envelope.to_json() {
                Ok(message) => {
                    if let Err(e) = broker.publish(GLOBAL_CHANNEL, message).await {
                        tracing::warn!(node_id = %self.id, event = %event, error = %e, "Global publish failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(node_id = %self.id, event = %event, error = %e, "Failed to encode global message");
                }
            }
        }

        delivered
    }

    /// Replay a global message published by another node
    pub async fn handle_global_message(&self, envelope: BrokerEnvelope) -> usize {
        if envelope.is_echo(&self.id) {
            tracing::trace!(node_id = %self.id, event = %envelope.event, "Ignoring own global message");
            return 0;
        }

        self.deliver_global(
            &envelope.namespace,
            &envelope.event,
            &envelope.data,
            envelope.sender_conn_id.as_deref(),
        )
        .await
    }

    async fn deliver_global(
        &self,
        target: &str,
        event: &str,
        data: &Value,
        exclude: Option<&str>,
    ) -> usize {
        let mut delivered = 0;
        for namespace in self.namespaces() {
            if target == ALL_NAMESPACES || target == namespace.name() {
                delivered += namespace
                    .deliver_local(&Scope::All, event, data, exclude)
                    .await;
            }
        }
        delivered
    }

    /// Run one liveness pass over every connection of every namespace
    ///
    /// Returns the number of connections terminated.
    pub async fn heartbeat_tick(&self) -> usize {
        let mut terminated = 0;
        for namespace in self.namespaces() {
            for conn in namespace.connections() {
                if !conn.check_liveness().await {
                    terminated += 1;
                }
            }
        }
        terminated
    }

    /// Connection IDs of a namespace across the cluster
    ///
    /// Uses the state adapter when present, otherwise this node's registry.
    pub async fn namespace_clients(&self, path: &str) -> Vec<String> {
        let name = normalize_path(path);

        if let Some(state_adapter) = &self.state_adapter {
            match state_adapter.get_namespace_clients(&name).await {
                Ok(clients) => return clients,
                Err(e) => {
                    tracing::warn!(node_id = %self.id, ns = %name, error = %e, "Presence lookup failed, using local registry");
                }
            }
        }

        self.namespace(&name)
            .map(|namespace| namespace.local_clients())
            .unwrap_or_default()
    }

    /// Register the listener side, shut down by [`Node::close`]
    pub fn set_acceptor(&self, acceptor: Arc<dyn Acceptor>) {
        *self.acceptor.lock() = Some(acceptor);
    }

    /// Point-in-time counters
    pub fn stats(&self) -> NodeStats {
        let namespaces: Vec<NamespaceStats> =
            self.namespaces().iter().map(|namespace| namespace.stats()).collect();

        NodeStats {
            node_id: self.id.to_string(),
            created_at: self.created_at,
            connections: namespaces.iter().map(|stats| stats.connections).sum(),
            namespaces,
        }
    }

    pub(crate) async fn subscribe_global(&self) {
        let Some(broker) = &self.broker else {
            return;
        };

        let subscription = match broker.subscribe(GLOBAL_CHANNEL).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(node_id = %self.id, error = %e, "Failed to subscribe global channel");
                return;
            }
        };

        let weak = self.weak.clone();
        let listener = BrokerListener::spawn(subscription, self.span.clone(), move |envelope| {
            let weak = weak.clone();
            async move {
                let Some(node) = weak.upgrade() else {
                    return false;
                };
                node.handle_global_message(envelope).await;
                true
            }
        });

        *self.global_listener.lock() = Some(listener);
    }

    pub(crate) fn start_heartbeat(&self, period: Duration) {
        let weak = self.weak.clone();

        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    ticker.tick().await;
                    let Some(node) = weak.upgrade() else {
                        break;
                    };

                    let terminated = node.heartbeat_tick().await;
                    if terminated > 0 {
                        tracing::info!(terminated, "Terminated unresponsive connections");
                    }
                }
            }
            .instrument(self.span.clone()),
        );

        *self.heartbeat.lock() = Some(task);
    }

    /// Shut the node down
    ///
    /// Stops the heartbeat, unsubscribes the global channel, destroys every
    /// namespace, shuts the acceptor down and waits for it, then releases
    /// the broker and state adapter. Later calls are no-ops.
    pub async fn close(&self) -> Result<(), NodeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(node_id = %self.id, "Closing node");

        if let Some(task) = self.heartbeat.lock().take() {
            task.abort();
        }

        let listener = self.global_listener.lock().take();
        if let (Some(listener), Some(broker)) = (listener, &self.broker) {
            listener.stop(broker.as_ref()).await;
        }

        let namespaces: Vec<Arc<Namespace>> =
            self.namespaces.write().drain().map(|(_, ns)| ns).collect();
        for namespace in namespaces {
            namespace.destroy().await;
        }

        let acceptor = self.acceptor.lock().take();
        let shutdown = match acceptor {
            Some(acceptor) => acceptor.shutdown().await,
            None => Ok(()),
        };

        if let Some(broker) = &self.broker {
            if let Err(e) = broker.close().await {
                tracing::warn!(node_id = %self.id, error = %e, "Failed to close broker");
            }
        }
        if let Some(state_adapter) = &self.state_adapter {
            if let Err(e) = state_adapter.close().await {
                tracing::warn!(node_id = %self.id, error = %e, "Failed to close state adapter");
            }
        }

        tracing::info!(node_id = %self.id, "Node closed");
        shutdown.map_err(NodeError::from)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("namespaces", &self.namespaces.read().len())
            .field("broker", &self.broker.is_some())
            .field("state_adapter", &self.state_adapter.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryBroker, MemoryStateAdapter};
    use crate::testing::{connect, handshake, node, wait_until};
    use crate::transport::memory::{memory_transport, Frame};
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingAcceptor {
        shut: AtomicBool,
    }

    #[async_trait]
    impl Acceptor for RecordingAcceptor {
        async fn shutdown(&self) -> Result<(), TransportError> {
            self.shut.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_of_normalizes_and_reuses() {
        let node = node().await;
        let a = node.of("chat/").await.unwrap();
        let b = node.of("/chat").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "/chat");
        assert_eq!(node.of("").await.unwrap().name(), "/");
        assert_eq!(node.namespaces().len(), 2);
    }

    #[tokio::test]
    async fn test_accept_unknown_namespace() {
        let node = node().await;
        let (transport, inbound, mut peer) = memory_transport();

        let result = node.accept(transport, inbound, handshake("/missing")).await;

        assert!(matches!(result, Err(AcceptError::NamespaceNotFound(ref path)) if path == "/missing"));
        assert_eq!(
            peer.drain(),
            vec![Frame::Close {
                code: 4004,
                reason: "namespace not found".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_terminates_after_one_missed_tick() {
        let node = node().await;
        node.of("/").await.unwrap();
        let (responsive, responsive_peer) = connect(&node, "/").await;
        let (silent, mut silent_peer) = connect(&node, "/").await;

        assert_eq!(node.heartbeat_tick().await, 0);
        assert!(!responsive.is_alive());
        assert!(!silent.is_alive());

        responsive_peer.pong().await;
        wait_until(|| responsive.is_alive()).await;

        assert_eq!(node.heartbeat_tick().await, 1);
        assert!(silent.is_closed());
        assert!(!responsive.is_closed());
        assert_eq!(silent.close_info().map(|i| i.code), Some(4000));
        assert_eq!(silent_peer.drain(), vec![Frame::Ping, Frame::Terminated]);
        assert_eq!(node.namespace("/").unwrap().local_clients(), vec![responsive.id().to_string()]);
    }

    #[tokio::test]
    async fn test_heartbeat_ticker_runs() {
        let node = Node::builder()
            .heartbeat_interval(Some(Duration::from_millis(20)))
            .build()
            .await
            .unwrap();
        node.of("/").await.unwrap();
        let (silent, _peer) = connect(&node, "/").await;

        wait_until(|| silent.is_closed()).await;
        node.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_global_targets() {
        let node = node().await;
        node.of("/a").await.unwrap();
        node.of("/b").await.unwrap();
        let (_a, mut pa) = connect(&node, "/a").await;
        let (b, mut pb) = connect(&node, "/b").await;

        assert_eq!(node.broadcast_global("maintenance", json!("soon"), None, None).await, 2);
        assert_eq!(pa.drain_envelopes()[0].ns.as_deref(), Some("/a"));
        assert_eq!(pb.drain_envelopes()[0].ns.as_deref(), Some("/b"));

        assert_eq!(node.broadcast_global("only-a", Value::Null, None, Some("a")).await, 1);
        assert_eq!(pa.drain_envelopes().len(), 1);
        assert!(pb.drain_envelopes().is_empty());

        assert_eq!(node.broadcast_global("all", Value::Null, Some(b.id()), Some("*")).await, 1);
        assert!(pb.drain_envelopes().is_empty());
    }

    #[tokio::test]
    async fn test_global_echo_is_discarded() {
        let node = Node::builder()
            .id("node-a")
            .heartbeat_interval(None)
            .build()
            .await
            .unwrap();
        node.of("/").await.unwrap();
        let (_conn, mut peer) = connect(&node, "/").await;

        let own = BrokerEnvelope::broadcast("node-a", ALL_NAMESPACES, "e", Value::Null);
        assert_eq!(node.handle_global_message(own).await, 0);

        let remote = BrokerEnvelope::broadcast("node-b", ALL_NAMESPACES, "e", Value::Null);
        assert_eq!(node.handle_global_message(remote).await, 1);
        assert_eq!(peer.drain_envelopes().len(), 1);
    }

    #[tokio::test]
    async fn test_namespace_clients_uses_state_adapter() {
        let state = MemoryStateAdapter::new();
        let node = Node::builder()
            .id("node-a")
            .state_adapter(Arc::new(state.attach()))
            .heartbeat_interval(None)
            .build()
            .await
            .unwrap();
        node.of("/chat").await.unwrap();
        let (conn, _peer) = connect(&node, "/chat").await;

        // Another node's connection, visible only through the shared store
        let remote = crate::ClientMeta {
            server_id: "node-b".to_string(),
            user_id: None,
            connected_at: Utc::now(),
        };
        state.add_client("/chat", "remote-conn", &remote).await.unwrap();

        let clients = node.namespace_clients("chat").await;
        assert_eq!(clients.len(), 2);
        assert!(clients.contains(&conn.id().to_string()));
        assert_eq!(state.client("/chat", conn.id()).unwrap().server_id, "node-a");

        conn.disconnect(CloseCode::Normal).await;
        assert_eq!(node.namespace_clients("/chat").await, vec!["remote-conn".to_string()]);
    }

    #[tokio::test]
    async fn test_namespace_clients_without_state_adapter() {
        let node = node().await;
        node.of("/chat").await.unwrap();
        let (conn, _peer) = connect(&node, "/chat").await;

        assert_eq!(node.namespace_clients("/chat").await, vec![conn.id().to_string()]);
        assert!(node.namespace_clients("/other").await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_namespace() {
        let node = node().await;
        let chat = node.of("/chat").await.unwrap();
        let (conn, _peer) = connect(&node, "/chat").await;

        assert!(node.remove_namespace("/chat").await);
        assert!(!node.remove_namespace("/chat").await);
        assert!(chat.is_destroyed());
        assert!(conn.is_closed());
        assert!(node.namespace("/chat").is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_everything() {
        let broker = MemoryBroker::new();
        let node = Node::builder()
            .broker(Arc::new(broker.attach()))
            .heartbeat_interval(Some(Duration::from_secs(30)))
            .build()
            .await
            .unwrap();
        let acceptor = Arc::new(RecordingAcceptor::default());
        node.set_acceptor(acceptor.clone());

        let chat = node.of("/chat").await.unwrap();
        let (conn, mut peer) = connect(&node, "/chat").await;
        assert_eq!(broker.subscriber_count(GLOBAL_CHANNEL), 1);
        assert_eq!(broker.subscriber_count(chat.channel()), 1);

        node.close().await.unwrap();
        node.close().await.unwrap();

        assert!(node.is_closed());
        assert!(acceptor.shut.load(Ordering::SeqCst));
        assert!(chat.is_destroyed());
        assert!(conn.is_closed());
        assert_eq!(
            peer.drain(),
            vec![Frame::Close {
                code: 4005,
                reason: "namespace destroyed".to_string()
            }]
        );
        assert_eq!(broker.subscriber_count(GLOBAL_CHANNEL), 0);
        assert_eq!(broker.subscriber_count(chat.channel()), 0);
        assert!(matches!(node.of("/chat").await, Err(NodeError::Closed)));

        let (transport, inbound, _peer) = memory_transport();
        assert!(matches!(
            node.accept(transport, inbound, handshake("/chat")).await,
            Err(AcceptError::NodeClosed)
        ));
    }

    #[tokio::test]
    async fn test_of_racing_close_leaves_no_subscription() {
        let broker = MemoryBroker::new();
        let node = Node::builder()
            .broker(Arc::new(broker.attach()))
            .heartbeat_interval(None)
            .build()
            .await
            .unwrap();

        let creates: Vec<_> = (0..20)
            .map(|i| {
                let node = node.clone();
                tokio::spawn(async move { node.of(&format!("/ns{i}")).await })
            })
            .collect();
        node.close().await.unwrap();

        for (i, create) in creates.into_iter().enumerate() {
            match create.await.unwrap() {
                Ok(namespace) => assert!(namespace.is_destroyed()),
                Err(e) => assert!(matches!(e, NodeError::Closed)),
            }
            let channel = crate::protocol::namespace_channel(&format!("/ns{i}"));
            assert_eq!(broker.subscriber_count(&channel), 0);
        }
        assert!(node.namespaces().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let node = node().await;
        node.of("/a").await.unwrap();
        node.of("/b").await.unwrap();
        let (_a, _pa) = connect(&node, "/a").await;
        let (_b, _pb) = connect(&node, "/b").await;

        let stats = node.stats();
        assert_eq!(stats.node_id, node.id());
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.namespaces.len(), 2);
        assert_eq!(stats.namespaces[0].name, "/a");
    }
}
