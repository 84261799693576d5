//! Server node

mod builder;
mod node;
mod path;

pub use builder::NodeBuilder;
pub use node::{AcceptError, Node, NodeError, NodeOptions, NodeStats, DEFAULT_HEARTBEAT_INTERVAL};
pub use path::normalize_path;
