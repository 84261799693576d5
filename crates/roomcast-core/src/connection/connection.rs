//! A single admitted connection
//!
//! Wraps one transport, which nobody else writes to. Owns the outbound
//! send path, a private event bus for inbound application events, the
//! forward index of joined rooms, and the liveness flag.

use crate::events::EventBus;
use crate::namespace::{Namespace, NamespaceError};
use crate::protocol::{CloseCode, Envelope, EnvelopeRef};
use crate::transport::{Handshake, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};
use tracing::Instrument;

/// Event emitted on the connection bus during teardown
pub const DISCONNECT_EVENT: &str = "disconnect";

/// Code and reason the connection ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// An admitted bidirectional connection
pub struct Connection {
    /// Unique connection ID
    id: String,

    /// Name of the owning namespace
    namespace_name: Arc<str>,

    /// Owning namespace
    namespace: Weak<Namespace>,

    /// Exclusively owned outbound transport
    transport: Arc<dyn Transport>,

    /// Request metadata captured at accept time
    handshake: Handshake,

    /// Authenticated user, usually set by an admission stage
    user_id: RwLock<Option<String>>,

    /// Free-form metadata set by admission stages or handlers
    meta: RwLock<HashMap<String, Value>>,

    /// Joined rooms, mirrored by each room's member set
    pub(crate) rooms: Mutex<HashSet<String>>,

    /// Heartbeat flag
    alive: AtomicBool,

    /// Set once teardown has started
    closed: AtomicBool,

    close_info: Mutex<Option<CloseInfo>>,

    /// Wakes the reader task on teardown
    shutdown: Notify,

    /// Inbound application events
    bus: EventBus<Value>,

    connected_at: DateTime<Utc>,
}

impl Connection {
    pub(crate) fn new(
        namespace_name: Arc<str>,
        namespace: Weak<Namespace>,
        transport: Arc<dyn Transport>,
        handshake: Handshake,
        max_listeners: usize,
    ) -> Arc<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        let bus = EventBus::with_max_listeners(format!("conn:{id}"), max_listeners);

        Arc::new(Self {
            id,
            namespace_name,
            namespace,
            transport,
            handshake,
            user_id: RwLock::new(None),
            meta: RwLock::new(HashMap::new()),
            rooms: Mutex::new(HashSet::new()),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            close_info: Mutex::new(None),
            shutdown: Notify::new(),
            bus,
            connected_at: Utc::now(),
        })
    }

    /// Get the connection ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the owning namespace name
    pub fn namespace_name(&self) -> &str {
        &self.namespace_name
    }

    /// Get the owning namespace, if it still exists
    pub fn namespace(&self) -> Option<Arc<Namespace>> {
        self.namespace.upgrade()
    }

    /// Get the request metadata
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Get the user ID (if authenticated)
    pub fn user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }

    /// Set the user ID
    ///
    /// Only takes effect on the user index when set before registration.
    pub fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }

    /// Get a metadata value
    pub fn meta(&self, key: &str) -> Option<Value> {
        self.meta.read().get(key).cloned()
    }

    /// Set a metadata value
    pub fn set_meta(&self, key: impl Into<String>, value: Value) {
        self.meta.write().insert(key.into(), value);
    }

    /// Get the joined rooms
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.lock().iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Check if the connection is a member of a room
    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.lock().contains(room)
    }

    /// Get the connection time
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Get the heartbeat flag
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Check if teardown has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Code and reason the connection ended with
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.close_info.lock().clone()
    }

    /// Inbound application events, keyed by envelope event name
    pub fn events(&self) -> &EventBus<Value> {
        &self.bus
    }

    /// Send an event to this connection
    ///
    /// Best effort: returns `false` and drops the message if the transport
    /// is not open or the write fails.
    pub async fn send(&self, event: &str, data: &Value) -> bool {
        let frame = EnvelopeRef {
            event,
            data,
            ns: Some(&*self.namespace_name),
        }
        .encode();

        match frame {
            Ok(frame) => self.send_frame(frame).await,
            Err(e) => {
                tracing::warn!(conn_id = %self.id, event = %event, error = %e, "Failed to encode message");
                false
            }
        }
    }

    /// Send a prepared envelope to this connection
    pub async fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(frame) => self.send_frame(frame).await,
            Err(e) => {
                tracing::warn!(conn_id = %self.id, error = %e, "Failed to encode envelope");
                false
            }
        }
    }

    /// Write an already encoded frame
    pub(crate) async fn send_frame(&self, frame: String) -> bool {
        if self.is_closed() || !self.transport.is_open() {
            return false;
        }

        match self.transport.send(frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(conn_id = %self.id, error = %e, "Dropped outbound frame");
                false
            }
        }
    }

    /// Join a room of the owning namespace
    ///
    /// Returns `false` if the connection already was a member.
    pub fn join(&self, room: &str) -> Result<bool, NamespaceError> {
        let namespace = self.namespace.upgrade().ok_or(NamespaceError::Destroyed)?;
        namespace.join_room(room, &self.id)
    }

    /// Leave a room of the owning namespace
    ///
    /// Returns `false` if the connection was not a member.
    pub fn leave(&self, room: &str) -> Result<bool, NamespaceError> {
        let namespace = self.namespace.upgrade().ok_or(NamespaceError::Destroyed)?;
        namespace.leave_room(room, &self.id)
    }

    /// Liveness check run once per heartbeat tick
    ///
    /// Returns `false` if the connection missed the previous ping and was
    /// terminated.
    pub async fn check_liveness(self: &Arc<Self>) -> bool {
        if self.is_closed() {
            return false;
        }

        if !self.alive.swap(false, Ordering::SeqCst) {
            tracing::info!(conn_id = %self.id, ns = %self.namespace_name, "Heartbeat timeout");
            self.transport.terminate();
            self.teardown(CloseCode::HeartbeatTimeout.as_u16(), CloseCode::HeartbeatTimeout.reason())
                .await;
            return false;
        }

        if let Err(e) = self.transport.ping().await {
            tracing::debug!(conn_id = %self.id, error = %e, "Ping failed");
        }
        true
    }

    /// Gracefully close the connection
    pub async fn disconnect(self: &Arc<Self>, code: CloseCode) {
        self.disconnect_with(code.as_u16(), code.reason()).await;
    }

    /// Gracefully close the connection with a custom code and reason
    pub async fn disconnect_with(self: &Arc<Self>, code: u16, reason: &str) {
        if self.is_closed() {
            return;
        }

        if let Err(e) = self.transport.close(code, reason).await {
            tracing::debug!(conn_id = %self.id, error = %e, "Close handshake failed");
        }
        self.teardown(code, reason).await;
    }

    /// Abruptly drop the connection without a close handshake
    pub async fn terminate(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }

        self.transport.terminate();
        self.teardown(CloseCode::GoingAway.as_u16(), "terminated").await;
    }

    /// Single teardown path, runs at most once
    async fn teardown(self: &Arc<Self>, code: u16, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.close_info.lock() = Some(CloseInfo {
            code,
            reason: reason.to_string(),
        });
        self.shutdown.notify_one();

        match self.namespace.upgrade() {
            Some(namespace) => {
                namespace.remove_connection(&self.id).await;
            }
            None => self.rooms.lock().clear(),
        }

        let _ = self
            .bus
            .emit(DISCONNECT_EVENT, json!({ "code": code, "reason": reason }))
            .await;
        let _ = self.bus.destroy();

        tracing::debug!(conn_id = %self.id, code, reason = %reason, "Connection closed");
    }

    /// Consume inbound transport events until the connection ends
    pub(crate) fn spawn_reader(
        self: &Arc<Self>,
        mut inbound: mpsc::Receiver<TransportEvent>,
        span: tracing::Span,
    ) {
        let conn = self.clone();

        tokio::spawn(
            async move {
                loop {
                    let event = tokio::select! {
                        _ = conn.shutdown.notified() => break,
                        event = inbound.recv() => event,
                    };

                    match event {
                        Some(TransportEvent::Message(text)) => conn.handle_message(&text).await,
                        Some(TransportEvent::Pong) => conn.alive.store(true, Ordering::SeqCst),
                        Some(TransportEvent::Error(message)) => {
                            tracing::warn!(conn_id = %conn.id, error = %message, "Transport error");
                            conn.transport.terminate();
                            conn.teardown(
                                CloseCode::TransportError.as_u16(),
                                CloseCode::TransportError.reason(),
                            )
                            .await;
                            break;
                        }
                        Some(TransportEvent::Closed { code, reason }) => {
                            let code = code.unwrap_or(CloseCode::GoingAway.as_u16());
                            conn.teardown(code, &reason).await;
                            break;
                        }
                        None => {
                            conn.teardown(CloseCode::GoingAway.as_u16(), "transport dropped")
                                .await;
                            break;
                        }
                    }
                }
            }
            .instrument(span),
        );
    }

    async fn handle_message(&self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(conn_id = %self.id, error = %e, "Malformed inbound message");
                self.send_envelope(&Envelope::error("MALFORMED_MESSAGE", e.to_string()))
                    .await;
                return;
            }
        };

        if let Err(e) = self.bus.emit(&envelope.event, envelope.data).await {
            tracing::debug!(conn_id = %self.id, error = %e, "Inbound event after teardown");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("namespace", &self.namespace_name)
            .field("user_id", &self.user_id())
            .field("alive", &self.is_alive())
            .field("closed", &self.is_closed())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::detached_connection_with;
    use crate::transport::memory::{memory_transport, Frame};

    #[tokio::test]
    async fn test_send_wraps_namespace() {
        let (transport, _events, mut peer) = memory_transport();
        let conn = detached_connection_with("/chat", transport);

        assert!(conn.send("msg", &json!("hi")).await);

        let envelope = peer.next_envelope().await.unwrap();
        assert_eq!(envelope.event, "msg");
        assert_eq!(envelope.data, json!("hi"));
        assert_eq!(envelope.ns.as_deref(), Some("/chat"));
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let (transport, _events, mut peer) = memory_transport();
        let conn = detached_connection_with("/", transport);

        conn.disconnect(CloseCode::Normal).await;
        assert!(!conn.send("late", &Value::Null).await);
        assert_eq!(
            peer.drain(),
            vec![Frame::Close {
                code: 1000,
                reason: "normal closure".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_teardown_runs_once() {
        let (transport, _events, _peer) = memory_transport();
        let conn = detached_connection_with("/", transport);
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let c = count.clone();
        conn.events()
            .on(DISCONNECT_EVENT, move |_, _| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        conn.disconnect(CloseCode::Normal).await;
        conn.terminate().await;
        conn.disconnect(CloseCode::GoingAway).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(conn.events().is_disposed());
        assert_eq!(conn.close_info().map(|i| i.code), Some(1000));
    }

    #[tokio::test]
    async fn test_liveness_pings_then_terminates() {
        let (transport, _events, mut peer) = memory_transport();
        let conn = detached_connection_with("/", transport.clone());

        assert!(conn.check_liveness().await);
        assert!(!conn.is_alive());
        assert_eq!(transport.ping_count(), 1);

        assert!(!conn.check_liveness().await);
        assert!(conn.is_closed());
        assert_eq!(conn.close_info().map(|i| i.code), Some(4000));
        assert_eq!(peer.drain(), vec![Frame::Ping, Frame::Terminated]);
    }
}
