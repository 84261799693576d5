//! # roomcast-core
//!
//! Room/namespace broadcast engine for persistent bidirectional connections.
//!
//! ## Features
//!
//! - **Event Bus**: In-process pub/sub with `*` and `**` wildcard patterns
//! - **Admission**: Ordered async stages run before a connection is registered
//! - **Rooms**: Named groups created on first join, deleted per [`RoomPolicy`]
//! - **Cluster Fan-out**: Broadcasts replayed on other nodes through a broker,
//!   with echo suppression
//! - **Liveness**: Heartbeat ping/pong with termination after a missed tick
//!
//! ## Example
//!
//! ```ignore
//! use roomcast_core::{memory_transport, Handshake, Node};
//!
//! let node = Node::builder().build().await?;
//! let chat = node.of("/chat").await?;
//!
//! chat.events().on("connection", |_, conn| async move {
//!     conn.join("general")?;
//!     Ok(())
//! })?;
//!
//! let (transport, inbound, peer) = memory_transport();
//! node.accept(transport, inbound, Handshake::new("/chat")).await?;
//!
//! chat.to_room("general").emit("msg", json!("hi")).await;
//! ```

pub mod adapters;
pub mod admission;
pub mod connection;
pub mod events;
pub mod namespace;
pub mod node;
pub mod protocol;
pub mod room;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export adapter types
pub use adapters::memory::{MemoryBroker, MemoryStateAdapter};
pub use adapters::{
    AdapterError, AdapterResult, BrokerAdapter, BrokerSubscription, ClientMeta, StateAdapter,
    SubscriptionId,
};

// Re-export admission types
pub use admission::{AdmissionContext, AdmissionError, AdmissionPipeline, AdmissionResult, Next};

// Re-export engine types
pub use connection::{CloseInfo, Connection, DISCONNECT_EVENT};
pub use events::{BusError, EventBus, HandlerResult, ListenerId, Pattern};
pub use namespace::{
    Emitter, Namespace, NamespaceError, NamespaceOptions, NamespaceStats, CONNECTION_EVENT,
};
pub use node::{normalize_path, AcceptError, Node, NodeBuilder, NodeError, NodeOptions, NodeStats};
pub use room::{Room, RoomPolicy};

// Re-export protocol and transport types
pub use protocol::{BrokerEnvelope, CloseCode, DispatchKind, Envelope};
pub use transport::memory::{memory_transport, Frame, MemoryPeer, MemoryTransport};
pub use transport::{Acceptor, Handshake, Transport, TransportError, TransportEvent};
