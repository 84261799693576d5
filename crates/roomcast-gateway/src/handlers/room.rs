//! Room membership handlers

use super::{HandlerError, HandlerResult, ROOM_JOINED, ROOM_LEFT};
use roomcast_core::Connection;
use serde_json::{json, Value};
use std::sync::Arc;

/// Room name from either `"name"` or `{"room": "name"}`
pub(crate) fn room_name(data: &Value) -> HandlerResult<String> {
    let name = match data {
        Value::String(name) => name.as_str(),
        Value::Object(map) => map.get("room").and_then(Value::as_str).unwrap_or_default(),
        _ => "",
    };

    let name = name.trim();
    if name.is_empty() {
        return Err(HandlerError::InvalidPayload("room name required".to_string()));
    }
    Ok(name.to_string())
}

/// `room.join`
pub async fn join(conn: Arc<Connection>, data: Value) -> HandlerResult<()> {
    let room = room_name(&data)?;
    let joined = conn.join(&room)?;

    tracing::debug!(conn_id = %conn.id(), room = %room, joined, "Joined room");
    conn.send(ROOM_JOINED, &json!({ "room": room })).await;
    Ok(())
}

/// `room.leave`
pub async fn leave(conn: Arc<Connection>, data: Value) -> HandlerResult<()> {
    let room = room_name(&data)?;
    let left = conn.leave(&room)?;

    tracing::debug!(conn_id = %conn.id(), room = %room, left, "Left room");
    conn.send(ROOM_LEFT, &json!({ "room": room })).await;
    Ok(())
}
