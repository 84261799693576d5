//! Socket side of the gateway
//!
//! [`WsTransport`] adapts one upgraded WebSocket to the engine's
//! transport seam; [`ServerAcceptor`] owns the listening server.

mod acceptor;
mod websocket;

pub use acceptor::ServerAcceptor;
pub use websocket::WsTransport;
