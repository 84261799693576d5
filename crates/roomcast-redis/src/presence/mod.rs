//! Cluster-wide connection presence

mod state;

pub use state::{RedisStateAdapter, CLIENTS_PREFIX};
