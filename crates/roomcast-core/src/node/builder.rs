//! Node construction with injected collaborators

use super::node::{Node, NodeError, NodeOptions};
use crate::adapters::{BrokerAdapter, StateAdapter};
use crate::room::RoomPolicy;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`Node`]
///
/// ```ignore
/// let node = Node::builder()
///     .broker(Arc::new(RedisBroker::new(pool)))
///     .heartbeat_interval(Some(Duration::from_secs(30)))
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct NodeBuilder {
    id: Option<String>,
    broker: Option<Arc<dyn BrokerAdapter>>,
    state_adapter: Option<Arc<dyn StateAdapter>>,
    options: NodeOptions,
}

impl NodeBuilder {
    /// Create a builder with default options and no adapters
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed node ID instead of a generated one
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Fan out through a broker
    pub fn broker(mut self, broker: Arc<dyn BrokerAdapter>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Record presence in a state adapter
    pub fn state_adapter(mut self, state_adapter: Arc<dyn StateAdapter>) -> Self {
        self.state_adapter = Some(state_adapter);
        self
    }

    /// Replace all options
    pub fn options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the heartbeat period; `None` or zero disables the ticker
    pub fn heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.options.heartbeat_interval = interval;
        self
    }

    /// Policy of rooms created implicitly by a join
    pub fn default_room_policy(mut self, policy: RoomPolicy) -> Self {
        self.options.namespace.default_room_policy = policy;
        self
    }

    /// Soft per-pattern listener limit
    pub fn max_listeners(mut self, max_listeners: usize) -> Self {
        self.options.namespace.max_listeners = max_listeners;
        self
    }

    /// Connect the adapters and start the node
    pub async fn build(self) -> Result<Arc<Node>, NodeError> {
        if let Some(broker) = &self.broker {
            broker.connect().await?;
        }
        if let Some(state_adapter) = &self.state_adapter {
            state_adapter.connect().await?;
        }

        let id = self
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let node = Node::new(id, self.broker, self.state_adapter, self.options);

        node.subscribe_global().await;

        if let Some(period) = self.options.heartbeat_interval.filter(|p| !p.is_zero()) {
            node.start_heartbeat(period);
        }

        tracing::info!(
            node_id = %node.id(),
            heartbeat = ?self.options.heartbeat_interval,
            "Node started"
        );

        Ok(node)
    }
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("id", &self.id)
            .field("broker", &self.broker.is_some())
            .field("state_adapter", &self.state_adapter.is_some())
            .field("options", &self.options)
            .finish()
    }
}
