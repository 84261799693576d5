//! Namespace: connection registry, room table, user index
//!
//! All three maps live behind one lock so that join, leave and removal
//! are a single step with no observable intermediate state. Lock order is
//! namespace state, then room members, then a connection's room set.
//! Nothing is awaited while the lock is held: recipients are snapshotted
//! first and written to afterwards.

use super::emitter::{Emitter, Scope};
use crate::adapters::{BrokerAdapter, BrokerListener, ClientMeta, StateAdapter};
use crate::admission::{AdmissionContext, AdmissionError, AdmissionPipeline};
use crate::connection::{Connection, DISCONNECT_EVENT};
use crate::events::{EventBus, DEFAULT_MAX_LISTENERS};
use crate::protocol::{namespace_channel, BrokerEnvelope, CloseCode, DispatchKind, EnvelopeRef};
use crate::room::{Room, RoomPolicy};
use crate::transport::{Handshake, Transport, TransportEvent};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::Instrument;

/// Event emitted on the namespace bus once a connection is registered
pub const CONNECTION_EVENT: &str = "connection";

/// Namespace configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceOptions {
    /// Policy of rooms created implicitly by a join
    pub default_room_policy: RoomPolicy,
    /// Soft per-pattern listener limit of namespace and connection buses
    pub max_listeners: usize,
}

impl Default for NamespaceOptions {
    fn default() -> Self {
        Self {
            default_room_policy: RoomPolicy::Immediate,
            max_listeners: DEFAULT_MAX_LISTENERS,
        }
    }
}

/// Error type for namespace operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("Namespace has been destroyed")]
    Destroyed,

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Room already exists: {0}")]
    RoomExists(String),
}

/// Point-in-time counters of a namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub name: String,
    pub connections: usize,
    pub rooms: usize,
    pub users: usize,
}

#[derive(Default)]
struct NamespaceState {
    connections: HashMap<String, Arc<Connection>>,
    rooms: HashMap<String, Arc<Room>>,
    users: HashMap<String, HashSet<String>>,
    /// User each connection was indexed under at registration
    indexed_users: HashMap<String, String>,
}

impl NamespaceState {
    /// Remove a room and clear it from every member's room set
    fn drop_room(&mut self, name: &str) -> bool {
        let Some(room) = self.rooms.remove(name) else {
            return false;
        };

        for member in room.destroy() {
            if let Some(conn) = self.connections.get(&member) {
                conn.rooms.lock().remove(name);
            }
        }
        true
    }
}

/// A namespace
pub struct Namespace {
    name: Arc<str>,
    node_id: Arc<str>,
    channel: String,
    weak: Weak<Namespace>,
    state: Mutex<NamespaceState>,
    pipeline: AdmissionPipeline,
    bus: EventBus<Arc<Connection>>,
    broker: Option<Arc<dyn BrokerAdapter>>,
    state_adapter: Option<Arc<dyn StateAdapter>>,
    listener: Mutex<Option<BrokerListener>>,
    destroyed: AtomicBool,
    options: NamespaceOptions,
    span: tracing::Span,
}

impl Namespace {
    pub(crate) fn new(
        name: &str,
        node_id: Arc<str>,
        broker: Option<Arc<dyn BrokerAdapter>>,
        state_adapter: Option<Arc<dyn StateAdapter>>,
        options: NamespaceOptions,
    ) -> Arc<Self> {
        let span = tracing::info_span!("namespace", ns = %name, node_id = %node_id);

        Arc::new_cyclic(|weak| Self {
            name: Arc::from(name),
            node_id,
            channel: namespace_channel(name),
            weak: weak.clone(),
            state: Mutex::new(NamespaceState::default()),
            pipeline: AdmissionPipeline::new(),
            bus: EventBus::with_max_listeners(format!("ns:{name}"), options.max_listeners),
            broker,
            state_adapter,
            listener: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            options,
            span,
        })
    }

    /// Subscribe to this namespace's broker channel
    pub(crate) async fn subscribe_broker(&self) {
        let Some(broker) = &self.broker else {
            return;
        };

        let subscription = match broker.subscribe(&self.channel).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(ns = %self.name, channel = %self.channel, error = %e, "Failed to subscribe namespace channel");
                return;
            }
        };

        let weak = self.weak.clone();
        let listener = BrokerListener::spawn(subscription, self.span.clone(), move |envelope| {
            let weak = weak.clone();
            async move {
                let Some(namespace) = weak.upgrade() else {
                    return false;
                };
                namespace.handle_broker_message(envelope).await;
                true
            }
        });

        let previous = self.listener.lock().replace(listener);
        if let Some(previous) = previous {
            previous.stop(broker.as_ref()).await;
        }

        // destroy() may have run while the subscription was pending
        if self.is_destroyed() {
            let listener = self.listener.lock().take();
            if let Some(listener) = listener {
                listener.stop(broker.as_ref()).await;
            }
        }
    }

    /// Get the namespace name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the ID of the owning node
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Get the broker channel of this namespace
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Admission pipeline run for every new connection
    pub fn pipeline(&self) -> &AdmissionPipeline {
        &self.pipeline
    }

    /// Namespace events: `connection` and `disconnect`, carrying the connection
    pub fn events(&self) -> &EventBus<Arc<Connection>> {
        &self.bus
    }

    /// Check if the namespace has been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Wrap a transport in a connection owned by this namespace
    pub(crate) fn new_connection(
        &self,
        transport: Arc<dyn Transport>,
        handshake: Handshake,
    ) -> Arc<Connection> {
        Connection::new(
            self.name.clone(),
            self.weak.clone(),
            transport,
            handshake,
            self.options.max_listeners,
        )
    }

    /// Admit and register a connection
    ///
    /// On rejection the connection is closed with [`CloseCode::Forbidden`]
    /// and never registered. On success the inbound event stream is consumed
    /// until the transport closes.
    pub async fn add_connection(
        &self,
        conn: Arc<Connection>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Result<(), AdmissionError> {
        if self.is_destroyed() {
            conn.disconnect(CloseCode::NamespaceDestroyed).await;
            return Err(AdmissionError::Disposed);
        }

        let ctx = AdmissionContext::new(self.name.clone(), conn.clone());
        if let Err(e) = self.pipeline.run(ctx).await {
            tracing::info!(ns = %self.name, conn_id = %conn.id(), error = %e, "Connection rejected");
            conn.disconnect(CloseCode::Forbidden).await;
            return Err(e);
        }

        let user_id = conn.user_id();
        let registered = {
            let mut state = self.state.lock();
            if self.is_destroyed() {
                false
            } else {
                state
                    .connections
                    .insert(conn.id().to_string(), conn.clone());
                if let Some(user_id) = &user_id {
                    state
                        .users
                        .entry(user_id.clone())
                        .or_default()
                        .insert(conn.id().to_string());
                    state
                        .indexed_users
                        .insert(conn.id().to_string(), user_id.clone());
                }
                true
            }
        };

        if !registered {
            conn.disconnect(CloseCode::NamespaceDestroyed).await;
            return Err(AdmissionError::Disposed);
        }

        if let Some(state_adapter) = &self.state_adapter {
            let meta = ClientMeta {
                server_id: self.node_id.to_string(),
                user_id: user_id.clone(),
                connected_at: conn.connected_at(),
            };
            if let Err(e) = state_adapter.add_client(&self.name, conn.id(), &meta).await {
                tracing::warn!(ns = %self.name, conn_id = %conn.id(), error = %e, "Failed to record client");
            }
        }

        tracing::debug!(
            ns = %self.name,
            conn_id = %conn.id(),
            user_id = ?user_id,
            "Connection registered"
        );

        if let Err(e) = self.bus.emit(CONNECTION_EVENT, conn.clone()).await {
            tracing::debug!(ns = %self.name, error = %e, "Connection event after destroy");
        }

        let span = tracing::debug_span!(parent: &self.span, "connection", conn_id = %conn.id());
        conn.spawn_reader(inbound, span);

        Ok(())
    }

    /// Remove a connection from every room, the user index and the registry
    ///
    /// Returns `false` if the connection was not registered.
    pub async fn remove_connection(&self, conn_id: &str) -> bool {
        let conn = {
            let mut state = self.state.lock();
            let Some(conn) = state.connections.get(conn_id).cloned() else {
                return false;
            };

            let rooms: Vec<String> = conn.rooms.lock().iter().cloned().collect();
            for room in &rooms {
                self.leave_locked(&mut state, room, &conn);
            }

            // The user ID may have changed since registration
            if let Some(user_id) = state.indexed_users.remove(conn_id) {
                if let Some(conns) = state.users.get_mut(&user_id) {
                    conns.remove(conn_id);
                    if conns.is_empty() {
                        state.users.remove(&user_id);
                    }
                }
            }

            state.connections.remove(conn_id);
            conn
        };

        if let Some(state_adapter) = &self.state_adapter {
            if let Err(e) = state_adapter.remove_client(&self.name, conn_id).await {
                tracing::warn!(ns = %self.name, conn_id = %conn_id, error = %e, "Failed to forget client");
            }
        }

        tracing::debug!(ns = %self.name, conn_id = %conn_id, "Connection removed");

        if let Err(e) = self.bus.emit(DISCONNECT_EVENT, conn).await {
            tracing::trace!(ns = %self.name, error = %e, "Disconnect event after destroy");
        }
        true
    }

    /// Add a connection to a room, creating the room on first join
    ///
    /// Returns `false` if the connection already was a member.
    pub fn join_room(&self, name: &str, conn_id: &str) -> Result<bool, NamespaceError> {
        let mut state = self.state.lock();
        if self.is_destroyed() {
            return Err(NamespaceError::Destroyed);
        }

        let conn = state
            .connections
            .get(conn_id)
            .cloned()
            .ok_or_else(|| NamespaceError::UnknownConnection(conn_id.to_string()))?;

        let room = state
            .rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(ns = %self.name, room = %name, "Room created");
                Arc::new(Room::new(
                    name,
                    self.weak.clone(),
                    self.options.default_room_policy,
                ))
            })
            .clone();

        let added = room.add(conn_id);
        if added {
            conn.rooms.lock().insert(name.to_string());
            tracing::debug!(ns = %self.name, conn_id = %conn_id, room = %name, "Joined room");
        }
        Ok(added)
    }

    /// Remove a connection from a room
    ///
    /// Returns `false` if the connection was not a member.
    pub fn leave_room(&self, name: &str, conn_id: &str) -> Result<bool, NamespaceError> {
        let mut state = self.state.lock();
        let conn = state
            .connections
            .get(conn_id)
            .cloned()
            .ok_or_else(|| NamespaceError::UnknownConnection(conn_id.to_string()))?;

        Ok(self.leave_locked(&mut state, name, &conn))
    }

    fn leave_locked(&self, state: &mut NamespaceState, name: &str, conn: &Connection) -> bool {
        conn.rooms.lock().remove(name);

        let Some(room) = state.rooms.get(name).cloned() else {
            return false;
        };

        let removed = room.remove(conn.id());
        if removed {
            tracing::debug!(ns = %self.name, conn_id = %conn.id(), room = %name, "Left room");
            if room.is_empty() {
                self.room_emptied(state, &room);
            }
        }
        removed
    }

    fn room_emptied(&self, state: &mut NamespaceState, room: &Arc<Room>) {
        match room.policy() {
            RoomPolicy::Immediate => {
                state.drop_room(room.name());
                tracing::debug!(ns = %self.name, room = %room.name(), "Room deleted");
            }
            RoomPolicy::Grace(delay) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let generation = room.mark_emptied();
                    let namespace = self.weak.clone();
                    let room = Arc::downgrade(room);
                    runtime.spawn(
                        async move {
                            tokio::time::sleep(delay).await;
                            if let (Some(namespace), Some(room)) =
                                (namespace.upgrade(), room.upgrade())
                            {
                                namespace.reap_room(&room, generation);
                            }
                        }
                        .instrument(self.span.clone()),
                    );
                }
                Err(_) => {
                    state.drop_room(room.name());
                }
            },
            RoomPolicy::Persistent => {}
        }
    }

    /// Delete a grace-period room if it is still the registered one and has
    /// stayed empty since `generation`
    fn reap_room(&self, room: &Arc<Room>, generation: u64) {
        let mut state = self.state.lock();
        let current = state
            .rooms
            .get(room.name())
            .is_some_and(|registered| Arc::ptr_eq(registered, room));

        if current && room.is_empty() && room.emptied_generation() == generation {
            state.drop_room(room.name());
            tracing::debug!(ns = %self.name, room = %room.name(), "Empty room expired");
        }
    }

    /// Pre-create a room with an explicit policy
    pub fn create_room(&self, name: &str, policy: RoomPolicy) -> Result<Arc<Room>, NamespaceError> {
        let mut state = self.state.lock();
        if self.is_destroyed() {
            return Err(NamespaceError::Destroyed);
        }
        if state.rooms.contains_key(name) {
            return Err(NamespaceError::RoomExists(name.to_string()));
        }

        let room = Arc::new(Room::new(name, self.weak.clone(), policy));
        state.rooms.insert(name.to_string(), room.clone());
        tracing::debug!(ns = %self.name, room = %name, policy = ?policy, "Room created");
        Ok(room)
    }

    /// Delete a room, removing it from every member's room set
    pub fn delete_room(&self, name: &str) -> bool {
        let deleted = self.state.lock().drop_room(name);
        if deleted {
            tracing::debug!(ns = %self.name, room = %name, "Room deleted");
        }
        deleted
    }

    /// Get a room by name
    pub fn room(&self, name: &str) -> Option<Arc<Room>> {
        self.state.lock().rooms.get(name).cloned()
    }

    /// Names of all rooms
    pub fn room_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().rooms.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get a registered connection
    pub fn connection(&self, conn_id: &str) -> Option<Arc<Connection>> {
        self.state.lock().connections.get(conn_id).cloned()
    }

    /// All registered connections
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.state.lock().connections.values().cloned().collect()
    }

    /// IDs of connections registered on this node
    pub fn local_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().connections.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// IDs of a user's connections on this node
    pub fn user_connections(&self, user_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .users
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Point-in-time counters
    pub fn stats(&self) -> NamespaceStats {
        let state = self.state.lock();
        NamespaceStats {
            name: self.name.to_string(),
            connections: state.connections.len(),
            rooms: state.rooms.len(),
            users: state.users.len(),
        }
    }

    /// Emit to every connection of the namespace, on every node
    pub async fn broadcast(&self, event: &str, data: Value, sender: Option<&str>) -> usize {
        let mut emitter = Emitter::new(self, Scope::All);
        if let Some(sender) = sender {
            emitter = emitter.except(sender);
        }
        emitter.emit(event, data).await
    }

    /// Emitter restricted to one room's members
    pub fn to_room(&self, room: impl Into<String>) -> Emitter<'_> {
        Emitter::new(self, Scope::Room(room.into()))
    }

    /// Emitter restricted to one user's connections
    pub fn to_user(&self, user_id: impl Into<String>) -> Emitter<'_> {
        Emitter::new(self, Scope::User(user_id.into()))
    }

    /// Local delivery followed by a broker publish
    pub(crate) async fn dispatch(
        &self,
        scope: &Scope,
        event: &str,
        data: Value,
        sender: Option<&str>,
    ) -> usize {
        let delivered = self.deliver_local(scope, event, &data, sender).await;

        let envelope = BrokerEnvelope::broadcast(&*self.node_id, &*self.name, event, data)
            .excluding(sender);
        let envelope = match scope {
            Scope::All => envelope,
            Scope::Room(room) => envelope.for_room(room.clone()),
            Scope::User(user_id) => envelope.for_user(user_id.clone()),
        };
        self.publish(&envelope).await;

        delivered
    }

    async fn publish(&self, envelope: &BrokerEnvelope) {
        let Some(broker) = &self.broker else {
            return;
        };

        let message = match envelope.to_json() {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(ns = %self.name, event = %envelope.event, error = %e, "Failed to encode broker message");
                return;
            }
        };

        if let Err(e) = broker.publish(&self.channel, message).await {
            tracing::warn!(ns = %self.name, event = %envelope.event, error = %e, "Broker publish failed");
        }
    }

    /// Replay a message published by another node
    ///
    /// Messages this node published itself are discarded. Nothing is
    /// republished.
    pub async fn handle_broker_message(&self, envelope: BrokerEnvelope) -> usize {
        if envelope.is_echo(&self.node_id) {
            tracing::trace!(ns = %self.name, event = %envelope.event, "Ignoring own broker message");
            return 0;
        }

        if envelope.namespace != *self.name {
            tracing::warn!(
                ns = %self.name,
                target = %envelope.namespace,
                "Broker message for another namespace"
            );
            return 0;
        }

        let scope = match (envelope.kind, envelope.room, envelope.user_id) {
            (DispatchKind::Broadcast, _, _) => Scope::All,
            (DispatchKind::Room, Some(room), _) => Scope::Room(room),
            (DispatchKind::User, _, Some(user_id)) => Scope::User(user_id),
            (kind, _, _) => {
                tracing::warn!(ns = %self.name, kind = ?kind, "Broker message without target");
                return 0;
            }
        };

        self.deliver_local(
            &scope,
            &envelope.event,
            &envelope.data,
            envelope.sender_conn_id.as_deref(),
        )
        .await
    }

    /// Deliver to the local connections of a scope
    pub(crate) async fn deliver_local(
        &self,
        scope: &Scope,
        event: &str,
        data: &Value,
        exclude: Option<&str>,
    ) -> usize {
        let recipients = {
            let state = self.state.lock();
            match scope {
                Scope::All => Self::resolve(&state, state.connections.keys(), exclude),
                Scope::Room(room) => match state.rooms.get(room) {
                    Some(room) => Self::resolve(&state, room.members().iter(), exclude),
                    None => Vec::new(),
                },
                Scope::User(user_id) => match state.users.get(user_id) {
                    Some(ids) => Self::resolve(&state, ids.iter(), exclude),
                    None => Vec::new(),
                },
            }
        };

        self.send_all(recipients, event, data).await
    }

    /// Deliver to a list of local connection IDs
    pub(crate) async fn deliver_to(&self, conn_ids: &[String], event: &str, data: &Value) -> usize {
        let recipients = {
            let state = self.state.lock();
            Self::resolve(&state, conn_ids.iter(), None)
        };
        self.send_all(recipients, event, data).await
    }

    fn resolve<'a>(
        state: &NamespaceState,
        ids: impl Iterator<Item = &'a String>,
        exclude: Option<&str>,
    ) -> Vec<Arc<Connection>> {
        ids.filter(|id| Some(id.as_str()) != exclude)
            .filter_map(|id| state.connections.get(id).cloned())
            .collect()
    }

    async fn send_all(&self, recipients: Vec<Arc<Connection>>, event: &str, data: &Value) -> usize {
        if recipients.is_empty() {
            return 0;
        }

        let frame = match (EnvelopeRef {
            event,
            data,
            ns: Some(&*self.name),
        })
        .encode()
        {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(ns = %self.name, event = %event, error = %e, "Failed to encode message");
                return 0;
            }
        };

        let mut delivered = 0;
        for conn in recipients {
            if conn.send_frame(frame.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Tear the namespace down
    ///
    /// Unsubscribes the broker channel, closes every connection with
    /// [`CloseCode::NamespaceDestroyed`], and disposes rooms, bus and
    /// pipeline. Later calls are no-ops.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let listener = self.listener.lock().take();
        if let (Some(listener), Some(broker)) = (listener, &self.broker) {
            listener.stop(broker.as_ref()).await;
        }

        for conn in self.connections() {
            conn.disconnect(CloseCode::NamespaceDestroyed).await;
        }

        {
            let mut state = self.state.lock();
            for (_, room) in state.rooms.drain() {
                room.destroy();
            }
            state.users.clear();
            state.indexed_users.clear();
            state.connections.clear();
        }

        let _ = self.bus.destroy();
        self.pipeline.destroy();

        tracing::info!(ns = %self.name, "Namespace destroyed");
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("node_id", &self.node_id)
            .field("connections", &stats.connections)
            .field("rooms", &stats.rooms)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
