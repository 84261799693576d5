//! Cross-process collaborators
//!
//! The broker carries fan-out between nodes; the state adapter keeps
//! cluster-wide presence. Both are injected into the [`Node`](crate::Node),
//! which is the only party that releases them.

mod listener;
pub mod memory;

pub(crate) use listener::BrokerListener;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Error type for broker and state adapter operations
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Adapter is closed")]
    Closed,

    #[error("Adapter unavailable: {0}")]
    Unavailable(String),

    #[error("Adapter backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Identifier of one broker subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Live subscription to a broker channel
///
/// Messages arrive in publish order for a given channel.
#[derive(Debug)]
pub struct BrokerSubscription {
    pub id: SubscriptionId,
    pub channel: String,
    pub messages: mpsc::UnboundedReceiver<String>,
}

/// Cross-process publish/subscribe
#[async_trait]
pub trait BrokerAdapter: Send + Sync + 'static {
    /// Connect; calling it again on a connected adapter is a no-op
    async fn connect(&self) -> AdapterResult<()>;

    /// Publish a raw message on a channel
    async fn publish(&self, channel: &str, message: String) -> AdapterResult<()>;

    /// Subscribe to a channel
    async fn subscribe(&self, channel: &str) -> AdapterResult<BrokerSubscription>;

    /// Drop a subscription
    async fn unsubscribe(&self, subscription: SubscriptionId) -> AdapterResult<()>;

    /// Release the underlying connection
    async fn close(&self) -> AdapterResult<()>;
}

/// Presence record stored per connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMeta {
    pub server_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Cross-process presence bookkeeping
#[async_trait]
pub trait StateAdapter: Send + Sync + 'static {
    /// Connect; calling it again on a connected adapter is a no-op
    async fn connect(&self) -> AdapterResult<()> {
        Ok(())
    }

    /// Record a connection of a namespace
    async fn add_client(&self, namespace: &str, conn_id: &str, meta: &ClientMeta)
        -> AdapterResult<()>;

    /// Forget a connection of a namespace
    async fn remove_client(&self, namespace: &str, conn_id: &str) -> AdapterResult<()>;

    /// Every connection id of a namespace, across all nodes
    async fn get_namespace_clients(&self, namespace: &str) -> AdapterResult<Vec<String>>;

    /// Release the underlying connection
    async fn close(&self) -> AdapterResult<()> {
        Ok(())
    }
}
