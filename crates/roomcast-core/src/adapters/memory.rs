//! In-process broker and state adapters
//!
//! A hub is shared by every handle created with `attach`, so several
//! nodes in one process behave like a cluster. Closing a handle only
//! releases that handle's subscriptions.

use super::{
    AdapterError, AdapterResult, BrokerAdapter, BrokerSubscription, ClientMeta, StateAdapter,
    SubscriptionId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct Hub {
    channels: Mutex<HashMap<String, Vec<(SubscriptionId, mpsc::UnboundedSender<String>)>>>,
    next_id: AtomicU64,
}

/// In-process broker
pub struct MemoryBroker {
    hub: Arc<Hub>,
    owned: Mutex<HashSet<SubscriptionId>>,
    closed: AtomicBool,
}

impl MemoryBroker {
    /// Create a broker with a fresh hub
    #[must_use]
    pub fn new() -> Self {
        Self::with_hub(Arc::new(Hub::default()))
    }

    /// Create another handle on the same hub
    #[must_use]
    pub fn attach(&self) -> Self {
        Self::with_hub(self.hub.clone())
    }

    fn with_hub(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            owned: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions on a channel across the hub
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.hub
            .channels
            .lock()
            .get(channel)
            .map_or(0, |subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
    }

    fn ensure_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AdapterError::Closed)
        } else {
            Ok(())
        }
    }

    fn remove(&self, ids: &HashSet<SubscriptionId>) {
        let mut channels = self.hub.channels.lock();
        for subs in channels.values_mut() {
            subs.retain(|(id, _)| !ids.contains(id));
        }
        channels.retain(|_, subs| !subs.is_empty());
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerAdapter for MemoryBroker {
    async fn connect(&self) -> AdapterResult<()> {
        self.ensure_open()
    }

    async fn publish(&self, channel: &str, message: String) -> AdapterResult<()> {
        self.ensure_open()?;

        let mut channels = self.hub.channels.lock();
        if let Some(subs) = channels.get_mut(channel) {
            subs.retain(|(_, tx)| tx.send(message.clone()).is_ok());
        }

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> AdapterResult<BrokerSubscription> {
        self.ensure_open()?;

        let id = SubscriptionId(self.hub.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = mpsc::unbounded_channel();

        self.hub
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        self.owned.lock().insert(id);

        Ok(BrokerSubscription {
            id,
            channel: channel.to_string(),
            messages: rx,
        })
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> AdapterResult<()> {
        self.owned.lock().remove(&subscription);
        self.remove(&HashSet::from([subscription]));
        Ok(())
    }

    async fn close(&self) -> AdapterResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let owned = std::mem::take(&mut *self.owned.lock());
        self.remove(&owned);
        Ok(())
    }
}

/// In-process presence store
#[derive(Clone, Default)]
pub struct MemoryStateAdapter {
    clients: Arc<DashMap<String, HashMap<String, ClientMeta>>>,
}

impl MemoryStateAdapter {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create another handle on the same store
    #[must_use]
    pub fn attach(&self) -> Self {
        self.clone()
    }

    /// Stored metadata of a connection
    pub fn client(&self, namespace: &str, conn_id: &str) -> Option<ClientMeta> {
        self.clients
            .get(namespace)
            .and_then(|clients| clients.get(conn_id).cloned())
    }
}

#[async_trait]
impl StateAdapter for MemoryStateAdapter {
    async fn add_client(
        &self,
        namespace: &str,
        conn_id: &str,
        meta: &ClientMeta,
    ) -> AdapterResult<()> {
        self.clients
            .entry(namespace.to_string())
            .or_default()
            .insert(conn_id.to_string(), meta.clone());
        Ok(())
    }

    async fn remove_client(&self, namespace: &str, conn_id: &str) -> AdapterResult<()> {
        if let Some(mut clients) = self.clients.get_mut(namespace) {
            clients.remove(conn_id);
        }
        self.clients
            .remove_if(namespace, |_, clients| clients.is_empty());
        Ok(())
    }

    async fn get_namespace_clients(&self, namespace: &str) -> AdapterResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .clients
            .get(namespace)
            .map(|clients| clients.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }
}
