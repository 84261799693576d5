//! Gateway state
//!
//! Application state for the gateway server.

use roomcast_common::AppConfig;
use roomcast_core::Node;
use std::sync::Arc;

/// Gateway application state
///
/// Holds the node every upgraded socket is accepted into.
#[derive(Clone)]
pub struct GatewayState {
    /// Engine node serving the configured namespaces
    node: Arc<Node>,
    /// Application configuration
    config: Arc<AppConfig>,
}

impl GatewayState {
    /// Create a new gateway state
    pub fn new(node: Arc<Node>, config: AppConfig) -> Self {
        Self {
            node,
            config: Arc::new(config),
        }
    }

    /// Get the node
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Get the application configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("node", &self.node.id())
            .field("config", &"AppConfig")
            .finish()
    }
}
