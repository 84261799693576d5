//! WebSocket transport
//!
//! Splits an upgraded socket into a writer task fed by a channel and a
//! reader task that turns frames into [`TransportEvent`]s.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use roomcast_core::{Transport, TransportError, TransportEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::Instrument;

/// Channel buffer size for outgoing frames
const OUTBOUND_BUFFER_SIZE: usize = 256;

/// Channel buffer size for inbound events
const INBOUND_BUFFER_SIZE: usize = 64;

/// How long a closing socket waits for the peer's close frame
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Frames queued for the writer task
#[derive(Debug)]
enum Outbound {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
}

/// [`Transport`] over an axum WebSocket
pub struct WsTransport {
    open: Arc<AtomicBool>,
    outbound: mpsc::Sender<Outbound>,
    reader: AbortHandle,
    writer: AbortHandle,
}

impl WsTransport {
    /// Start the socket pumps
    ///
    /// The returned receiver yields everything the peer sends and ends
    /// once the socket is gone.
    pub fn spawn(
        socket: WebSocket,
        span: tracing::Span,
    ) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (sink, stream) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let (events_tx, events_rx) = mpsc::channel(INBOUND_BUFFER_SIZE);
        let open = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(stream, events_tx, open.clone()).instrument(span.clone()))
            .abort_handle();
        let writer = tokio::spawn(
            write_loop(sink, outbound_rx, open.clone(), reader.clone()).instrument(span),
        )
        .abort_handle();

        let transport = Arc::new(Self {
            open,
            outbound: outbound_tx,
            reader,
            writer,
        });

        (transport, events_rx)
    }

    async fn enqueue(&self, frame: Outbound) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.enqueue(Outbound::Text(frame)).await
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.enqueue(Outbound::Ping).await
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.enqueue(Outbound::Close {
            code,
            reason: reason.to_string(),
        })
        .await?;
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.writer.abort();
        self.reader.abort();
    }
}

async fn read_loop(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    events: mpsc::Sender<TransportEvent>,
    open: Arc<AtomicBool>,
) {
    let last = loop {
        let event = match stream.next().await {
            Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => TransportEvent::Message(text),
                Err(_) => {
                    tracing::debug!("Dropping non UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Pong(_))) => TransportEvent::Pong,
            // Pings are answered by axum
            Some(Ok(Message::Ping(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(code = ?frame.as_ref().map(|f| f.code), "Peer closed socket");
                break TransportEvent::Closed {
                    code: frame.as_ref().map(|f| f.code),
                    reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                };
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket error");
                break TransportEvent::Error(e.to_string());
            }
            None => {
                break TransportEvent::Closed {
                    code: None,
                    reason: String::new(),
                }
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    };

    open.store(false, Ordering::SeqCst);
    let _ = events.send(last).await;
}

async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    open: Arc<AtomicBool>,
    reader: AbortHandle,
) {
    while let Some(frame) = outbound.recv().await {
        let result = match frame {
            Outbound::Text(text) => sink.send(Message::Text(text)).await,
            Outbound::Ping => sink.send(Message::Ping(Vec::new())).await,
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                let _ = sink.close().await;

                // Give the peer a moment to answer before dropping the socket
                tokio::time::sleep(CLOSE_GRACE).await;
                reader.abort();
                return;
            }
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "Failed to write to WebSocket");
            open.store(false, Ordering::SeqCst);
            break;
        }
    }

    let _ = sink.close().await;
}
