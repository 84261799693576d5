//! # roomcast-redis
//!
//! Redis-backed adapters for running several roomcast nodes as a cluster.
//!
//! ## Features
//!
//! - **Connection Pool**: Managed Redis connection pool with deadpool
//! - **Broker**: `PUBLISH` for outgoing fan-out, one reconnecting
//!   `SUBSCRIBE` connection routing messages to local subscriptions
//! - **Presence**: Per-namespace client hashes shared by every node
//!
//! ## Example
//!
//! ```ignore
//! use roomcast_redis::{RedisBroker, RedisPool, RedisPoolConfig, RedisStateAdapter};
//!
//! let pool = RedisPool::new(RedisPoolConfig::default())?;
//!
//! let node = Node::builder()
//!     .broker(Arc::new(RedisBroker::new(pool.clone())))
//!     .state_adapter(Arc::new(RedisStateAdapter::new(pool)))
//!     .build()
//!     .await?;
//! ```

pub mod pool;
pub mod presence;
pub mod pubsub;

// Re-export pool types
pub use pool::{RedisPool, RedisPoolConfig, RedisPoolError, RedisResult};

// Re-export adapter types
pub use presence::{RedisStateAdapter, CLIENTS_PREFIX};
pub use pubsub::{RedisBroker, RedisBrokerConfig};
