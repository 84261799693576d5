//! Relay handlers: room, user and namespace messages

use super::{
    HandlerError, HandlerResult, NAMESPACE_MESSAGE, ROOM_MESSAGE, USER_MESSAGE,
};
use roomcast_core::{Connection, Namespace};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// `room.message` payload
#[derive(Debug, Deserialize)]
struct RoomMessage {
    room: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// `user.message` payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserMessage {
    user_id: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// `namespace.message` payload
#[derive(Debug, Deserialize)]
struct NamespaceMessage {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    payload: Value,
}

fn namespace_of(conn: &Connection) -> HandlerResult<Arc<Namespace>> {
    conn.namespace().ok_or(HandlerError::NamespaceGone)
}

/// Event name to deliver under; blank names fall back to `default`
fn event_name(event: Option<String>, default: &str) -> String {
    event
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Data delivered to recipients
fn relayed(conn: &Connection, payload: Value) -> Value {
    json!({
        "from": conn.id(),
        "userId": conn.user_id(),
        "payload": payload,
    })
}

/// `room.message`: fan out to the room, sender excluded
pub async fn room(conn: Arc<Connection>, data: Value) -> HandlerResult<()> {
    let message: RoomMessage = serde_json::from_value(data)?;
    let room = message.room.trim();
    if room.is_empty() {
        return Err(HandlerError::InvalidPayload("room name required".to_string()));
    }

    let namespace = namespace_of(&conn)?;
    let event = event_name(message.event, ROOM_MESSAGE);

    let mut data = relayed(&conn, message.payload);
    data["room"] = Value::String(room.to_string());

    let delivered = namespace
        .to_room(room)
        .except(conn.id())
        .emit(&event, data)
        .await;

    tracing::trace!(conn_id = %conn.id(), room = %room, event = %event, delivered, "Relayed room message");
    Ok(())
}

/// `user.message`: deliver to every connection of a user, sender excluded
pub async fn user(conn: Arc<Connection>, data: Value) -> HandlerResult<()> {
    let message: UserMessage = serde_json::from_value(data)?;
    if message.user_id.trim().is_empty() {
        return Err(HandlerError::InvalidPayload("userId required".to_string()));
    }

    let namespace = namespace_of(&conn)?;
    let event = event_name(message.event, USER_MESSAGE);

    let delivered = namespace
        .to_user(message.user_id.as_str())
        .except(conn.id())
        .emit(&event, relayed(&conn, message.payload))
        .await;

    tracing::trace!(conn_id = %conn.id(), target = %message.user_id, event = %event, delivered, "Relayed user message");
    Ok(())
}

/// `namespace.message`: broadcast to the namespace, sender excluded
pub async fn namespace(conn: Arc<Connection>, data: Value) -> HandlerResult<()> {
    let message: NamespaceMessage = serde_json::from_value(data)?;

    let namespace = namespace_of(&conn)?;
    let event = event_name(message.event, NAMESPACE_MESSAGE);

    let delivered = namespace
        .broadcast(&event, relayed(&conn, message.payload), Some(conn.id()))
        .await;

    tracing::trace!(conn_id = %conn.id(), event = %event, delivered, "Relayed namespace message");
    Ok(())
}
