//! Redis Pub/Sub broker.
//!
//! Publishes through the pool. A single background connection holds every
//! `SUBSCRIBE` for this process and routes messages to local subscriptions;
//! it reconnects and resubscribes after a connection loss.

use crate::pool::{redact, RedisPool, RedisPoolError};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use redis::AsyncCommands;
use roomcast_core::{AdapterError, AdapterResult, BrokerAdapter, BrokerSubscription, SubscriptionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Broker tuning
#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    /// Delay before reconnecting the subscriber connection
    pub reconnect_delay: Duration,
    /// How long `subscribe` waits for Redis to confirm
    pub subscribe_timeout: Duration,
}

impl Default for RedisBrokerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            subscribe_timeout: Duration::from_secs(5),
        }
    }
}

type Subscribers = Vec<(SubscriptionId, mpsc::UnboundedSender<String>)>;

/// Local subscriptions keyed by channel
#[derive(Default)]
struct Routes {
    channels: Mutex<HashMap<String, Subscribers>>,
}

impl Routes {
    fn channels(&self) -> Vec<String> {
        self.channels.lock().keys().cloned().collect()
    }

    /// Register a subscription; true if it is the first on its channel
    fn add(&self, channel: &str, id: SubscriptionId, tx: mpsc::UnboundedSender<String>) -> bool {
        let mut channels = self.channels.lock();
        let subs = channels.entry(channel.to_string()).or_default();
        subs.push((id, tx));
        subs.len() == 1
    }

    /// Remove a subscription; returns its channel if no subscriber is left
    fn remove(&self, id: SubscriptionId) -> Option<String> {
        let mut channels = self.channels.lock();
        let channel = channels
            .iter()
            .find(|(_, subs)| subs.iter().any(|(sub, _)| *sub == id))
            .map(|(channel, _)| channel.clone())?;

        let subs = channels.get_mut(&channel)?;
        subs.retain(|(sub, _)| *sub != id);
        if subs.is_empty() {
            channels.remove(&channel);
            Some(channel)
        } else {
            None
        }
    }

    /// Hand a message to every live subscriber of its channel
    fn route(&self, channel: &str, payload: &str) -> usize {
        let mut channels = self.channels.lock();
        let Some(subs) = channels.get_mut(channel) else {
            return 0;
        };
        subs.retain(|(_, tx)| tx.send(payload.to_string()).is_ok());
        subs.len()
    }

    fn clear(&self) {
        self.channels.lock().clear();
    }
}

/// Commands for the subscriber connection
#[derive(Debug)]
enum Command {
    Subscribe(String, oneshot::Sender<()>),
    Unsubscribe(String),
    Shutdown,
}

/// Redis-backed [`BrokerAdapter`]
pub struct RedisBroker {
    pool: RedisPool,
    config: RedisBrokerConfig,
    routes: Arc<Routes>,
    control: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl RedisBroker {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self::with_config(pool, RedisBrokerConfig::default())
    }

    #[must_use]
    pub fn with_config(pool: RedisPool, config: RedisBrokerConfig) -> Self {
        Self {
            pool,
            config,
            routes: Arc::new(Routes::default()),
            control: Mutex::new(None),
            listener: Mutex::new(None),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Channels with at least one local subscription
    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut channels = self.routes.channels();
        channels.sort();
        channels
    }

    fn ensure_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AdapterError::Closed)
        } else {
            Ok(())
        }
    }

    fn control(&self) -> AdapterResult<mpsc::UnboundedSender<Command>> {
        self.ensure_open()?;
        self.control
            .lock()
            .clone()
            .ok_or_else(|| AdapterError::Unavailable("broker is not connected".to_string()))
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("pool", &self.pool)
            .field("channels", &self.routes.channels().len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerAdapter for RedisBroker {
    async fn connect(&self) -> AdapterResult<()> {
        self.ensure_open()?;
        if self.control.lock().is_some() {
            return Ok(());
        }

        self.pool.ping().await?;

        let mut control = self.control.lock();
        if control.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Listener {
            url: self.pool.url().to_string(),
            routes: self.routes.clone(),
            commands: rx,
            reconnect_delay: self.config.reconnect_delay,
            pending: Vec::new(),
        };
        let task = tokio::spawn(
            listener
                .run()
                .instrument(tracing::info_span!("redis_broker", url = %redact(self.pool.url()))),
        );

        *control = Some(tx);
        *self.listener.lock() = Some(task);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: String) -> AdapterResult<()> {
        self.ensure_open()?;

        let mut conn = self.pool.get().await?;
        let receivers: i64 = conn
            .publish(channel, message)
            .await
            .map_err(RedisPoolError::from)?;

        tracing::trace!(channel = %channel, receivers, "Published broker message");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> AdapterResult<BrokerSubscription> {
        let control = self.control()?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = mpsc::unbounded_channel();

        if self.routes.add(channel, id, tx) {
            let (ack_tx, ack_rx) = oneshot::channel();
            control
                .send(Command::Subscribe(channel.to_string(), ack_tx))
                .map_err(|_| AdapterError::Unavailable("subscriber task stopped".to_string()))?;

            // The route stays registered and is resubscribed on reconnect
            if tokio::time::timeout(self.config.subscribe_timeout, ack_rx)
                .await
                .is_err()
            {
                tracing::warn!(channel = %channel, "Subscription not confirmed yet");
            }
        }

        tracing::debug!(channel = %channel, subscription = id.0, "Subscribed to broker channel");

        Ok(BrokerSubscription {
            id,
            channel: channel.to_string(),
            messages: rx,
        })
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> AdapterResult<()> {
        if let Some(channel) = self.routes.remove(subscription) {
            if let Some(control) = self.control.lock().as_ref() {
                let _ = control.send(Command::Unsubscribe(channel));
            }
        }
        Ok(())
    }

    async fn close(&self) -> AdapterResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(control) = self.control.lock().take() {
            let _ = control.send(Command::Shutdown);
        }
        let task = self.listener.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Broker listener ended abnormally");
            }
        }

        self.routes.clear();
        tracing::info!("Redis broker closed");
        Ok(())
    }
}

/// Owner of the subscriber connection
struct Listener {
    url: String,
    routes: Arc<Routes>,
    commands: mpsc::UnboundedReceiver<Command>,
    reconnect_delay: Duration,
    /// Subscribe requests waiting for a live connection
    pending: Vec<oneshot::Sender<()>>,
}

impl Listener {
    async fn run(mut self) {
        loop {
            match self.session().await {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Broker subscriber error, reconnecting...");
                    if self.backoff().await {
                        break;
                    }
                }
            }
        }
        tracing::info!("Broker subscriber shutting down");
    }

    /// Serve one connection until shutdown (`Ok`) or failure (`Err`)
    async fn session(&mut self) -> Result<(), redis::RedisError> {
        let client = redis::Client::open(self.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;

        for channel in self.routes.channels() {
            pubsub.subscribe(&channel).await?;
        }
        self.confirm_pending();

        tracing::info!("Broker subscriber connected to Redis");

        loop {
            let mut stream = pubsub.on_message();
            let command = loop {
                tokio::select! {
                    msg = stream.next() => match msg {
                        Some(msg) => {
                            let channel = msg.get_channel_name().to_string();
                            match msg.get_payload::<String>() {
                                Ok(payload) => {
                                    let delivered = self.routes.route(&channel, &payload);
                                    tracing::trace!(channel = %channel, delivered, "Received broker message");
                                }
                                Err(e) => {
                                    tracing::warn!(channel = %channel, error = %e, "Dropping non-text broker message");
                                }
                            }
                        }
                        None => {
                            return Err(redis::RedisError::from((
                                redis::ErrorKind::IoError,
                                "pub/sub stream ended",
                            )));
                        }
                    },
                    command = self.commands.recv() => break command,
                }
            };
            // The message stream borrows the connection
            drop(stream);

            match command {
                Some(Command::Subscribe(channel, ack)) => {
                    self.pending.push(ack);
                    pubsub.subscribe(&channel).await?;
                    self.confirm_pending();
                    tracing::debug!(channel = %channel, "Subscribed to Redis channel");
                }
                Some(Command::Unsubscribe(channel)) => {
                    pubsub.unsubscribe(&channel).await?;
                    tracing::debug!(channel = %channel, "Unsubscribed from Redis channel");
                }
                Some(Command::Shutdown) | None => return Ok(()),
            }
        }
    }

    /// Wait out the reconnect delay; true if shutdown was requested meanwhile
    async fn backoff(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.reconnect_delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return false,
                command = self.commands.recv() => match command {
                    Some(Command::Subscribe(_, ack)) => self.pending.push(ack),
                    Some(Command::Unsubscribe(_)) => {}
                    Some(Command::Shutdown) | None => return true,
                },
            }
        }
    }

    fn confirm_pending(&mut self) {
        for ack in self.pending.drain(..) {
            let _ = ack.send(());
        }
    }
}
