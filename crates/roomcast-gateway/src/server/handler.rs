//! WebSocket handler
//!
//! Upgrades the request and hands the socket to the node. The request
//! path selects the namespace; the query string and peer address are
//! visible to admission stages.

use crate::server::GatewayState;
use crate::transport::WsTransport;
use axum::{
    extract::{ws::WebSocket, ConnectInfo, Query, State, WebSocketUpgrade},
    http::Uri,
    response::Response,
};
use roomcast_core::Handshake;
use std::collections::HashMap;
use std::net::SocketAddr;

/// WebSocket gateway handler
pub async fn gateway_handler(
    State(state): State<GatewayState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let handshake = Handshake {
        path: uri.path().to_string(),
        query,
        remote_addr: connect_info.map(|ConnectInfo(addr)| addr),
    };

    ws.on_upgrade(move |socket| handle_socket(state, socket, handshake))
}

/// Accept an upgraded WebSocket into the node
async fn handle_socket(state: GatewayState, socket: WebSocket, handshake: Handshake) {
    let span = tracing::info_span!(
        "ws",
        path = %handshake.path,
        peer = ?handshake.remote_addr,
    );
    let (transport, inbound) = WsTransport::spawn(socket, span);

    let path = handshake.path.clone();
    match state.node().accept(transport, inbound, handshake).await {
        Ok(conn) => {
            tracing::info!(
                conn_id = %conn.id(),
                ns = %conn.namespace_name(),
                user_id = ?conn.user_id(),
                "WebSocket connection established"
            );
        }
        Err(e) => {
            tracing::info!(path = %path, error = %e, "WebSocket connection refused");
        }
    }
}
