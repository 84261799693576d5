//! Ordered chain of async admission stages

use crate::connection::Connection;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error type for admission
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Connection rejected: {reason}")]
    Rejected { reason: String },

    #[error("Admission stage called next() more than once")]
    NextCalledTwice,

    #[error("Admission pipeline has been disposed")]
    Disposed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdmissionError {
    /// Reject the connection with a reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Result returned by admission stages
pub type AdmissionResult = Result<(), AdmissionError>;

type Stage = Arc<dyn Fn(AdmissionContext, Next) -> BoxFuture<'static, AdmissionResult> + Send + Sync>;

/// What a stage sees of the connection being admitted
#[derive(Clone)]
pub struct AdmissionContext {
    pub namespace: Arc<str>,
    pub connection: Arc<Connection>,
}

impl AdmissionContext {
    /// Create a context
    pub fn new(namespace: Arc<str>, connection: Arc<Connection>) -> Self {
        Self {
            namespace,
            connection,
        }
    }

    /// Query parameter from the connection request
    pub fn query(&self, key: &str) -> Option<&str> {
        self.connection.handshake().query(key)
    }

    /// Peer address, if the transport reported one
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection.handshake().remote_addr
    }
}

impl std::fmt::Debug for AdmissionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionContext")
            .field("namespace", &self.namespace)
            .field("conn_id", &self.connection.id())
            .finish()
    }
}

/// Continuation handed to each stage
///
/// Running it executes the rest of the chain. It may be run at most once.
pub struct Next {
    stages: Arc<[Stage]>,
    index: usize,
    ctx: AdmissionContext,
    called: AtomicBool,
    violated: Arc<AtomicBool>,
}

impl Next {
    /// Run the remaining stages
    pub async fn run(&self) -> AdmissionResult {
        if self.called.swap(true, Ordering::SeqCst) {
            self.violated.store(true, Ordering::SeqCst);
            return Err(AdmissionError::NextCalledTwice);
        }

        dispatch(
            self.stages.clone(),
            self.index,
            self.ctx.clone(),
            self.violated.clone(),
        )
        .await
    }
}

fn dispatch(
    stages: Arc<[Stage]>,
    index: usize,
    ctx: AdmissionContext,
    violated: Arc<AtomicBool>,
) -> BoxFuture<'static, AdmissionResult> {
    Box::pin(async move {
        let Some(stage) = stages.get(index).cloned() else {
            return Ok(());
        };

        let next = Next {
            stages,
            index: index + 1,
            ctx: ctx.clone(),
            called: AtomicBool::new(false),
            violated,
        };

        stage(ctx, next).await
    })
}

/// Admission pipeline
///
/// Stages run in registration order. A stage that returns without running
/// `next` ends the chain and the connection is admitted; only errors reject.
pub struct AdmissionPipeline {
    stages: RwLock<Vec<Stage>>,
    disposed: AtomicBool,
}

impl AdmissionPipeline {
    /// Create an empty pipeline
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: RwLock::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Append a stage
    pub fn use_stage<F, Fut>(&self, stage: F) -> &Self
    where
        F: Fn(AdmissionContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AdmissionResult> + Send + 'static,
    {
        if self.is_disposed() {
            tracing::warn!("Ignoring stage added to a disposed admission pipeline");
            return self;
        }

        let stage: Stage = Arc::new(move |ctx, next| -> BoxFuture<'static, AdmissionResult> {
            Box::pin(stage(ctx, next))
        });
        self.stages.write().push(stage);
        self
    }

    /// Number of registered stages
    pub fn len(&self) -> usize {
        self.stages.read().len()
    }

    /// Check if no stage is registered
    pub fn is_empty(&self) -> bool {
        self.stages.read().is_empty()
    }

    /// Run every stage against a connection
    pub async fn run(&self, ctx: AdmissionContext) -> AdmissionResult {
        if self.is_disposed() {
            return Err(AdmissionError::Disposed);
        }

        let stages: Arc<[Stage]> = self.stages.read().iter().cloned().collect();
        let violated = Arc::new(AtomicBool::new(false));

        dispatch(stages, 0, ctx, violated.clone()).await?;

        // A stage may swallow the error from a second next() call
        if violated.load(Ordering::SeqCst) {
            return Err(AdmissionError::NextCalledTwice);
        }

        Ok(())
    }

    /// Drop every stage; later runs fail with [`AdmissionError::Disposed`]
    pub fn destroy(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.stages.write().clear();
    }

    /// Check if the pipeline has been disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Default for AdmissionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AdmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPipeline")
            .field("stages", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
