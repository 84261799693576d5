//! Built-in client protocol
//!
//! Every connection admitted into a served namespace accepts:
//!
//! | event | data | effect |
//! |---|---|---|
//! | `room.join` | room name | join, reply `room.joined` |
//! | `room.leave` | room name | leave, reply `room.left` |
//! | `room.message` | `{room, event?, payload}` | fan out to the room |
//! | `user.message` | `{userId, event?, payload}` | deliver to a user |
//! | `namespace.message` | `{event?, payload}` | broadcast to the namespace |
//!
//! Relayed messages exclude the sender. Failures are answered with an
//! `error` event and never close the connection.

mod error;
mod message;
mod room;

pub use error::{HandlerError, HandlerResult};

use roomcast_core::{BusError, Connection, ListenerId, Namespace, CONNECTION_EVENT};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

pub const ROOM_JOIN: &str = "room.join";
pub const ROOM_LEAVE: &str = "room.leave";
pub const ROOM_MESSAGE: &str = "room.message";
pub const USER_MESSAGE: &str = "user.message";
pub const NAMESPACE_MESSAGE: &str = "namespace.message";

pub const ROOM_JOINED: &str = "room.joined";
pub const ROOM_LEFT: &str = "room.left";

/// Attach the protocol to every future connection of a namespace
pub fn register(namespace: &Namespace) -> Result<ListenerId, BusError> {
    namespace
        .events()
        .on(CONNECTION_EVENT, |_, conn: Arc<Connection>| async move {
            attach(&conn)?;
            Ok(())
        })
}

/// Attach the protocol to one connection
pub fn attach(conn: &Arc<Connection>) -> Result<(), BusError> {
    on(conn, ROOM_JOIN, room::join)?;
    on(conn, ROOM_LEAVE, room::leave)?;
    on(conn, ROOM_MESSAGE, message::room)?;
    on(conn, USER_MESSAGE, message::user)?;
    on(conn, NAMESPACE_MESSAGE, message::namespace)?;
    Ok(())
}

fn on<F, Fut>(conn: &Arc<Connection>, event: &'static str, handler: F) -> Result<ListenerId, BusError>
where
    F: Fn(Arc<Connection>, Value) -> Fut + Copy + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    // The bus belongs to the connection; a strong handle would be a cycle
    let weak = Arc::downgrade(conn);

    conn.events().on(event, move |_, data| {
        let weak = weak.clone();
        async move {
            let Some(conn) = weak.upgrade() else {
                return Ok(());
            };

            if let Err(e) = handler(conn.clone(), data).await {
                tracing::debug!(conn_id = %conn.id(), event = %event, error = %e, "Handler rejected message");
                conn.send_envelope(&e.to_envelope()).await;
            }
            Ok(())
        }
    })
}
