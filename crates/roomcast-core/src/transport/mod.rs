//! Byte transport seam
//!
//! The engine never touches sockets. A server adapter wraps each accepted
//! bidirectional connection in a [`Transport`] (outbound side) and feeds
//! everything it receives into a channel of [`TransportEvent`]s (inbound
//! side). [`memory`] provides an in-process implementation.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Inbound notification produced by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived
    Message(String),
    /// The peer answered a ping
    Pong,
    /// The transport failed; the connection is torn down afterwards
    Error(String),
    /// The transport closed, gracefully or not
    Closed { code: Option<u16>, reason: String },
}

/// Outbound half of an accepted connection
///
/// Implementations are owned exclusively by one [`Connection`](crate::Connection).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether frames can still be written
    fn is_open(&self) -> bool;

    /// Write one text frame
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Send a transport-level ping
    async fn ping(&self) -> Result<(), TransportError>;

    /// Start a graceful close handshake
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;

    /// Drop the connection without a close handshake
    fn terminate(&self);
}

/// Listener side of the server, shut down by [`Node::close`](crate::Node::close)
#[async_trait]
pub trait Acceptor: Send + Sync + 'static {
    /// Stop accepting and resolve once the listener confirmed closure
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Connection request metadata
///
/// The path selects the namespace; query parameters carry auth material
/// for the admission pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub path: String,
    pub query: HashMap<String, String>,
    pub remote_addr: Option<SocketAddr>,
}

impl Handshake {
    /// Create a handshake for a path
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Add a query parameter
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Set the peer address
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Get a query parameter
    #[must_use]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}
