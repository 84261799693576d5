//! Connection presence stored in Redis.
//!
//! Each namespace maps to one hash: field = connection ID, value = JSON
//! [`ClientMeta`]. Every node of the cluster writes to the same hashes.

use crate::pool::{RedisPool, RedisPoolError, RedisResult};
use async_trait::async_trait;
use redis::AsyncCommands;
use roomcast_core::{AdapterResult, ClientMeta, StateAdapter};

/// Key prefix for namespace client hashes
pub const CLIENTS_PREFIX: &str = "roomcast:clients:";

/// Redis-backed [`StateAdapter`]
#[derive(Debug, Clone)]
pub struct RedisStateAdapter {
    pool: RedisPool,
}

impl RedisStateAdapter {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Hash key holding the clients of a namespace
    #[must_use]
    pub fn clients_key(namespace: &str) -> String {
        format!("{CLIENTS_PREFIX}{namespace}")
    }

    /// Stored metadata of one connection
    pub async fn client_meta(&self, namespace: &str, conn_id: &str) -> RedisResult<Option<ClientMeta>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.hget(Self::clients_key(namespace), conn_id).await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl StateAdapter for RedisStateAdapter {
    async fn connect(&self) -> AdapterResult<()> {
        self.pool.ping().await?;
        Ok(())
    }

    async fn add_client(
        &self,
        namespace: &str,
        conn_id: &str,
        meta: &ClientMeta,
    ) -> AdapterResult<()> {
        let value = serde_json::to_string(meta)?;
        let mut conn = self.pool.get().await?;
        conn.hset::<_, _, _, ()>(Self::clients_key(namespace), conn_id, value)
            .await
            .map_err(RedisPoolError::from)?;

        tracing::trace!(ns = %namespace, conn_id = %conn_id, "Client recorded");
        Ok(())
    }

    async fn remove_client(&self, namespace: &str, conn_id: &str) -> AdapterResult<()> {
        let mut conn = self.pool.get().await?;
        conn.hdel::<_, _, ()>(Self::clients_key(namespace), conn_id)
            .await
            .map_err(RedisPoolError::from)?;

        tracing::trace!(ns = %namespace, conn_id = %conn_id, "Client removed");
        Ok(())
    }

    async fn get_namespace_clients(&self, namespace: &str) -> AdapterResult<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let mut ids: Vec<String> = conn
            .hkeys(Self::clients_key(namespace))
            .await
            .map_err(RedisPoolError::from)?;

        ids.sort();
        Ok(ids)
    }
}
