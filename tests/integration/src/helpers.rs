//! Test helpers for integration tests
//!
//! Provides a gateway served on a loopback port, a WebSocket client that
//! speaks the envelope protocol, and an in-process cluster of nodes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use futures_util::{SinkExt, StreamExt};
use roomcast_common::AppConfig;
use roomcast_core::{
    memory_transport, AdmissionContext, Connection, Envelope, Handshake, MemoryBroker, MemoryPeer,
    MemoryStateAdapter, Namespace, Next, Node,
};
use roomcast_gateway::{build_node, create_app, handlers, GatewayState, ServerAcceptor};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// How long a client waits for a frame before failing
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Gateway running on a loopback port
pub struct TestGateway {
    pub addr: SocketAddr,
    pub node: Arc<Node>,
    pub client: reqwest::Client,
}

impl TestGateway {
    /// Start a gateway with the given config
    ///
    /// The configured port is ignored; an ephemeral one is bound instead.
    pub async fn start(config: AppConfig) -> Result<Self> {
        let node = build_node(&config).await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let app = create_app(GatewayState::new(node.clone(), config));
        let acceptor = ServerAcceptor::serve(listener, app)?;
        let addr = acceptor.local_addr();
        node.set_acceptor(acceptor);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self { addr, node, client })
    }

    /// HTTP URL for a path
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// WebSocket URL for a path and optional query
    pub fn ws_url(&self, path_and_query: &str) -> String {
        format!("ws://{}{}", self.addr, path_and_query)
    }

    /// Open a WebSocket to a path
    pub async fn connect(&self, path_and_query: &str) -> Result<WsClient> {
        WsClient::connect(&self.ws_url(path_and_query)).await
    }

    /// GET a JSON document
    pub async fn get_json(&self, path: &str) -> Result<(reqwest::StatusCode, Value)> {
        let response = self.client.get(self.http_url(path)).send().await?;
        let status = response.status();
        let body = response.json().await?;
        Ok((status, body))
    }

    /// Close the node and wait for the listener to stop
    pub async fn shutdown(&self) -> Result<()> {
        self.node.close().await?;
        Ok(())
    }
}

/// Close frame seen by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closed {
    pub code: u16,
    pub reason: String,
}

/// WebSocket client speaking the envelope protocol
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Connect to a `ws://` URL
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = connect_async(url).await?;
        Ok(Self { stream })
    }

    /// Send an event
    pub async fn send(&mut self, event: &str, data: Value) -> Result<()> {
        let frame = Envelope::new(event, data).to_json()?;
        self.stream.send(Message::Text(frame)).await?;
        Ok(())
    }

    /// Send a raw text frame
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Next envelope; fails on close or timeout
    pub async fn recv(&mut self) -> Result<Envelope> {
        match self.next_message(RECV_TIMEOUT).await? {
            Some(Message::Text(text)) => Ok(Envelope::from_json(&text)?),
            Some(Message::Close(frame)) => bail!("connection closed: {frame:?}"),
            Some(other) => bail!("unexpected frame: {other:?}"),
            None => bail!("connection ended"),
        }
    }

    /// Next envelope with a given event name, skipping others
    pub async fn recv_event(&mut self, event: &str) -> Result<Envelope> {
        loop {
            let envelope = self.recv().await?;
            if envelope.event == event {
                return Ok(envelope);
            }
        }
    }

    /// Wait for the server to close the socket
    pub async fn recv_close(&mut self) -> Result<Closed> {
        loop {
            match self.next_message(RECV_TIMEOUT).await? {
                Some(Message::Close(Some(frame))) => {
                    return Ok(Closed {
                        code: u16::from(frame.code),
                        reason: frame.reason.into_owned(),
                    });
                }
                Some(Message::Close(None)) | None => bail!("closed without a close frame"),
                Some(_) => {}
            }
        }
    }

    /// True if no envelope arrives within `wait`
    pub async fn is_silent_for(&mut self, wait: Duration) -> bool {
        loop {
            match self.next_message(wait).await {
                Ok(Some(Message::Text(_))) => return false,
                Ok(Some(Message::Ping(_) | Message::Pong(_))) => {}
                Ok(_) | Err(_) => return true,
            }
        }
    }

    /// Close from the client side
    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }

    async fn next_message(&mut self, wait: Duration) -> Result<Option<Message>> {
        loop {
            let next = tokio::time::timeout(wait, self.stream.next())
                .await
                .map_err(|_| anyhow!("timed out after {wait:?}"))?;

            match next {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(message)) => return Ok(Some(message)),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }
}

/// Nodes sharing one in-process broker and presence store
pub struct TestCluster {
    pub broker: MemoryBroker,
    pub presence: MemoryStateAdapter,
    pub nodes: Vec<Arc<Node>>,
}

impl TestCluster {
    /// Start `size` nodes, each serving `namespace` with the client protocol
    ///
    /// The `user` query parameter becomes the connection's user ID.
    pub async fn start(size: usize, namespace: &str) -> Result<Self> {
        let broker = MemoryBroker::new();
        let presence = MemoryStateAdapter::new();
        let mut nodes = Vec::with_capacity(size);

        for index in 0..size {
            let node = Node::builder()
                .id(format!("node-{index}"))
                .broker(Arc::new(broker.attach()))
                .state_adapter(Arc::new(presence.attach()))
                .heartbeat_interval(None)
                .build()
                .await?;

            let ns = node.of(namespace).await?;
            ns.pipeline().use_stage(|ctx: AdmissionContext, next: Next| async move {
                ctx.connection.set_user_id(ctx.query("user").map(String::from));
                next.run().await
            });
            handlers::register(&ns)?;
            nodes.push(node);
        }

        Ok(Self {
            broker,
            presence,
            nodes,
        })
    }

    /// Namespace of a node
    pub fn namespace(&self, node: usize, path: &str) -> Result<Arc<Namespace>> {
        self.nodes[node]
            .namespace(path)
            .ok_or_else(|| anyhow!("namespace {path} missing on node {node}"))
    }

    /// Accept an in-memory client into a node
    pub async fn connect(
        &self,
        node: usize,
        path: &str,
        user: &str,
    ) -> Result<(Arc<Connection>, MemoryPeer)> {
        let (transport, inbound, peer) = memory_transport();
        let handshake = Handshake::new(path).with_query("user", user);
        let conn = self.nodes[node].accept(transport, inbound, handshake).await?;
        Ok((conn, peer))
    }

    /// Close every node
    pub async fn shutdown(&self) -> Result<()> {
        for node in &self.nodes {
            node.close().await?;
        }
        Ok(())
    }
}
