//! Inter-node broker envelope
//!
//! Published on the broker whenever a node fans a message out, so other
//! nodes can replay the same local delivery.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace value addressing every namespace of a node
pub const ALL_NAMESPACES: &str = "*";

/// Delivery scope of a broker envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchKind {
    /// Members of one room
    Room,
    /// Connections of one user
    User,
    /// Every connection of the namespace
    #[default]
    Broadcast,
}

/// Broker message exchanged between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerEnvelope {
    /// Node that originated the message
    pub from_server_id: String,
    /// Target namespace, or [`ALL_NAMESPACES`]
    pub namespace: String,
    /// Event name
    pub event: String,
    /// Event payload
    #[serde(default)]
    pub data: Value,
    /// Connection excluded from delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_conn_id: Option<String>,
    /// Delivery scope
    #[serde(rename = "type", default)]
    pub kind: DispatchKind,
    /// Room name for [`DispatchKind::Room`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// User id for [`DispatchKind::User`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl BrokerEnvelope {
    /// Namespace-wide broadcast
    #[must_use]
    pub fn broadcast(
        from_server_id: impl Into<String>,
        namespace: impl Into<String>,
        event: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            from_server_id: from_server_id.into(),
            namespace: namespace.into(),
            event: event.into(),
            data,
            sender_conn_id: None,
            kind: DispatchKind::Broadcast,
            room: None,
            user_id: None,
        }
    }

    /// Restrict delivery to one room
    #[must_use]
    pub fn for_room(mut self, room: impl Into<String>) -> Self {
        self.kind = DispatchKind::Room;
        self.room = Some(room.into());
        self
    }

    /// Restrict delivery to one user
    #[must_use]
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.kind = DispatchKind::User;
        self.user_id = Some(user_id.into());
        self
    }

    /// Exclude the sending connection
    #[must_use]
    pub fn excluding(mut self, conn_id: Option<&str>) -> Self {
        self.sender_conn_id = conn_id.map(str::to_string);
        self
    }

    /// Check whether this node originated the message
    #[must_use]
    pub fn is_echo(&self, node_id: &str) -> bool {
        self.from_server_id == node_id
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
