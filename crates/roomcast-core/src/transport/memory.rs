//! In-process transport
//!
//! Connects a [`Transport`] to a [`MemoryPeer`] through channels. Used by
//! tests and by embedders that bridge their own I/O.

use super::{Transport, TransportError, TransportEvent};
use crate::protocol::Envelope;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound event buffer of a memory transport
const INBOUND_BUFFER: usize = 64;

/// Frame written by the server side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping,
    Close { code: u16, reason: String },
    Terminated,
}

/// Server side of an in-process connection
pub struct MemoryTransport {
    open: AtomicBool,
    pings: AtomicUsize,
    outbound: mpsc::UnboundedSender<Frame>,
    events: mpsc::Sender<TransportEvent>,
}

/// Client side of an in-process connection
pub struct MemoryPeer {
    transport: Arc<MemoryTransport>,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Frame>,
}

/// Create a connected transport/peer pair
///
/// The returned receiver is the inbound event stream handed to
/// [`Node::accept`](crate::Node::accept).
pub fn memory_transport() -> (
    Arc<MemoryTransport>,
    mpsc::Receiver<TransportEvent>,
    MemoryPeer,
) {
    let (events_tx, events_rx) = mpsc::channel(INBOUND_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let transport = Arc::new(MemoryTransport {
        open: AtomicBool::new(true),
        pings: AtomicUsize::new(0),
        outbound: outbound_tx,
        events: events_tx.clone(),
    });

    let peer = MemoryPeer {
        transport: transport.clone(),
        events: events_tx,
        outbound: outbound_rx,
    };

    (transport, events_rx, peer)
}

impl MemoryTransport {
    /// Number of pings written so far
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    fn shut(&self, frame: Frame, code: Option<u16>, reason: &str) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }

        let _ = self.outbound.send(frame);
        let _ = self.events.try_send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
        true
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Frame::Text(frame))
            .map_err(|_| TransportError::Closed)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        self.outbound
            .send(Frame::Ping)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = Frame::Close {
            code,
            reason: reason.to_string(),
        };
        if self.shut(frame, Some(code), reason) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn terminate(&self) {
        self.shut(Frame::Terminated, None, "terminated");
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("open", &self.is_open())
            .field("pings", &self.ping_count())
            .finish()
    }
}

impl MemoryPeer {
    /// Send a raw text frame to the server
    pub async fn send_text(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into())).await;
    }

    /// Send an envelope to the server
    pub async fn send_envelope(&self, envelope: &Envelope) {
        if let Ok(json) = envelope.to_json() {
            self.send_text(json).await;
        }
    }

    /// Answer a ping
    pub async fn pong(&self) {
        let _ = self.events.send(TransportEvent::Pong).await;
    }

    /// Report a transport failure
    pub async fn fail(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(message.into())).await;
    }

    /// Close from the client side
    pub async fn close(&self, code: u16) {
        self.transport.open.store(false, Ordering::SeqCst);
        let _ = self
            .events
            .send(TransportEvent::Closed {
                code: Some(code),
                reason: String::new(),
            })
            .await;
    }

    /// Wait for the next frame written by the server
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Wait for the next text frame decoded as an envelope, skipping pings
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        while let Some(frame) = self.outbound.recv().await {
            match frame {
                Frame::Text(text) => return Envelope::from_json(&text).ok(),
                Frame::Ping => continue,
                Frame::Close { .. } | Frame::Terminated => return None,
            }
        }
        None
    }

    /// Frames already written and not yet consumed
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Text frames already written and not yet consumed, decoded
    pub fn drain_envelopes(&mut self) -> Vec<Envelope> {
        self.drain()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => Envelope::from_json(&text).ok(),
                _ => None,
            })
            .collect()
    }

    /// Whether the server side is still open
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (transport, _events, mut peer) = memory_transport();
        transport.send("hello".to_string()).await.unwrap();
        transport.ping().await.unwrap();

        assert_eq!(peer.next_frame().await, Some(Frame::Text("hello".to_string())));
        assert_eq!(peer.next_frame().await, Some(Frame::Ping));
        assert_eq!(transport.ping_count(), 1);
    }

    #[tokio::test]
    async fn test_close_is_reported_once() {
        let (transport, mut events, mut peer) = memory_transport();

        transport.close(4003, "forbidden").await.unwrap();
        assert!(transport.close(4003, "forbidden").await.is_err());
        transport.terminate();

        assert!(!peer.is_open());
        assert_eq!(
            peer.drain(),
            vec![Frame::Close {
                code: 4003,
                reason: "forbidden".to_string()
            }]
        );
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Closed {
                code: Some(4003),
                reason: "forbidden".to_string()
            })
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, _events, _peer) = memory_transport();
        transport.terminate();
        assert_eq!(
            transport.send("late".to_string()).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn test_peer_events() {
        let (_transport, mut events, peer) = memory_transport();
        peer.send_text("{}").await;
        peer.pong().await;

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message("{}".to_string()))
        );
        assert_eq!(events.recv().await, Some(TransportEvent::Pong));
    }
}
