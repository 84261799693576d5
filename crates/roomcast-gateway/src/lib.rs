//! # roomcast-gateway
//!
//! WebSocket gateway that serves roomcast namespaces over axum.
//!
//! Each upgraded socket becomes a [`WsTransport`] accepted into the
//! [`Node`](roomcast_core::Node); the path selects the namespace and the
//! query string carries the auth token.

pub mod admission;
pub mod handlers;
pub mod server;
pub mod transport;

pub use admission::{rate_limit_stage, token_stage, IpRateLimiter};
pub use server::{build_node, create_app, run, GatewayState};
pub use transport::{ServerAcceptor, WsTransport};
