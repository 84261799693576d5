//! Namespaces
//!
//! Logical partitions of connections, each with its own rooms, user index,
//! admission pipeline, and broker channel.

mod emitter;
mod namespace;

pub use emitter::Emitter;
pub use namespace::{
    Namespace, NamespaceError, NamespaceOptions, NamespaceStats, CONNECTION_EVENT,
};

pub(crate) use emitter::Scope;
