//! Shared deadpool of Redis connections
//!
//! Commands (PUBLISH, presence hashes) check a connection out of the pool.
//! Pub/sub subscriptions need a dedicated connection and open their own
//! against [`RedisPool::url`].

use deadpool_redis::{Config, Pool, Runtime};
use roomcast_core::AdapterError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    pub url: String,
    pub max_connections: usize,
    /// Bound on waiting for or opening a connection; a publish to a dead
    /// Redis fails after this instead of stalling the sender
    pub checkout_timeout: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 16,
            checkout_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&roomcast_common::RedisConfig> for RedisPoolConfig {
    fn from(config: &roomcast_common::RedisConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections as usize,
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedisPoolError {
    #[error("Failed to create Redis pool: {0}")]
    CreatePool(String),

    #[error("Failed to get connection from pool: {0}")]
    GetConnection(#[from] deadpool_redis::PoolError),

    #[error("Redis command error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Presence entry is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RedisPoolError> for AdapterError {
    fn from(err: RedisPoolError) -> Self {
        match err {
            RedisPoolError::CreatePool(msg) => Self::Unavailable(msg),
            RedisPoolError::GetConnection(e) => Self::Unavailable(e.to_string()),
            RedisPoolError::Redis(e) if e.is_io_error() || e.is_connection_dropped() => {
                Self::Unavailable(e.to_string())
            }
            RedisPoolError::Redis(e) => Self::Backend(e.to_string()),
            RedisPoolError::Serialization(e) => Self::Serialization(e),
        }
    }
}

pub type RedisResult<T> = Result<T, RedisPoolError>;

#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
    url: String,
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPool")
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisPool {
    /// Build the pool; no connection is opened until the first checkout
    pub fn new(config: RedisPoolConfig) -> RedisResult<Self> {
        let pool = Config::from_url(&config.url)
            .builder()
            .map_err(|e| RedisPoolError::CreatePool(e.to_string()))?
            .max_size(config.max_connections)
            .wait_timeout(Some(config.checkout_timeout))
            .create_timeout(Some(config.checkout_timeout))
            .recycle_timeout(Some(config.checkout_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RedisPoolError::CreatePool(e.to_string()))?;

        tracing::info!(
            url = %redact(&config.url),
            max_connections = config.max_connections,
            checkout_timeout = ?config.checkout_timeout,
            "Redis pool created"
        );

        Ok(Self {
            pool,
            url: config.url,
        })
    }

    pub fn from_config(config: &roomcast_common::RedisConfig) -> RedisResult<Self> {
        Self::new(RedisPoolConfig::from(config))
    }

    pub async fn get(&self) -> RedisResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(RedisPoolError::GetConnection)
    }

    /// URL the pool connects to; pub/sub connections are opened against it
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn status(&self) -> deadpool_redis::Status {
        self.pool.status()
    }

    /// Round-trip a PING; used to fail fast at node startup
    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.get().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Strip credentials from a Redis URL for logging
pub(crate) fn redact(url: &str) -> &str {
    url.rsplit('@').next().unwrap_or(url)
}
