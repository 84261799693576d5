//! Listening server handed to the node for shutdown

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use roomcast_core::{Acceptor, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// axum server running in the background
///
/// [`Acceptor::shutdown`] stops accepting, lets in-flight requests finish
/// and resolves once the server task has exited.
pub struct ServerAcceptor {
    local_addr: SocketAddr,
    signal: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl ServerAcceptor {
    /// Serve `app` on `listener`
    ///
    /// Peer addresses are exposed to handlers through `ConnectInfo`.
    pub fn serve(listener: TcpListener, app: Router) -> std::io::Result<Arc<Self>> {
        let local_addr = listener.local_addr()?;
        let (signal_tx, signal_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = signal_rx.await;
            })
            .await
        });

        tracing::info!(addr = %local_addr, "Gateway listening");

        Ok(Arc::new(Self {
            local_addr,
            signal: Mutex::new(Some(signal_tx)),
            task: Mutex::new(Some(task)),
        }))
    }

    /// Bound address
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the server task is still running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl std::fmt::Debug for ServerAcceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerAcceptor")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}

#[async_trait]
impl Acceptor for ServerAcceptor {
    async fn shutdown(&self) -> Result<(), TransportError> {
        if let Some(signal) = self.signal.lock().take() {
            let _ = signal.send(());
        }

        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        match task.await {
            Ok(Ok(())) => {
                tracing::info!(addr = %self.local_addr, "Gateway stopped accepting connections");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let app = Router::new().route("/health", get(|| async { "OK" }));

        let acceptor = ServerAcceptor::serve(listener, app).unwrap();
        assert!(acceptor.is_running());
        assert_ne!(acceptor.local_addr().port(), 0);

        acceptor.shutdown().await.unwrap();
        assert!(!acceptor.is_running());

        // Second shutdown is a no-op
        acceptor.shutdown().await.unwrap();
        assert!(tokio::net::TcpStream::connect(acceptor.local_addr())
            .await
            .is_err());
    }
}
