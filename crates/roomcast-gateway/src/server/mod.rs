//! Gateway server setup
//!
//! Builds the node from configuration, serves the WebSocket endpoint and
//! drives shutdown.

mod handler;
mod state;
mod status;

pub use handler::gateway_handler;
pub use state::GatewayState;
pub use status::{ApiError, ApiResult, ClientsResponse, HealthResponse};

use crate::admission::{rate_limit_stage, token_stage, IpRateLimiter};
use crate::handlers;
use crate::transport::ServerAcceptor;
use axum::{body::Body, http::Request, routing::get, Router};
use roomcast_common::{AppConfig, AppError, TokenVerifier};
use roomcast_core::{Node, RoomPolicy};
use roomcast_redis::{RedisBroker, RedisPool, RedisStateAdapter};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Create the gateway router
///
/// Any path not taken by the status endpoints is a WebSocket endpoint for
/// the namespace of the same name.
pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/health", get(status::health_check))
        .route("/stats", get(status::stats))
        .route("/clients", get(status::clients))
        .route("/", get(gateway_handler))
        .route("/*path", get(gateway_handler))
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(state)
}

/// Build a node with adapters, policies and namespaces from configuration
///
/// Every configured namespace gets the per-IP rate limit stage, the token
/// stage when a JWT secret is set, and the built-in client protocol.
pub async fn build_node(config: &AppConfig) -> Result<Arc<Node>, AppError> {
    let engine = &config.engine;

    let mut builder = Node::builder()
        .heartbeat_interval(Some(Duration::from_secs(engine.heartbeat_interval_secs)))
        .default_room_policy(RoomPolicy::from_grace_secs(engine.room_empty_grace_secs))
        .max_listeners(engine.event_max_listeners);

    if let Some(redis) = &config.redis {
        tracing::info!("Connecting to Redis...");
        let pool = RedisPool::from_config(redis).map_err(AppError::redis)?;
        builder = builder
            .broker(Arc::new(RedisBroker::new(pool.clone())))
            .state_adapter(Arc::new(RedisStateAdapter::new(pool)));
    }

    let node = builder
        .build()
        .await
        .map_err(AppError::redis)?;

    let verifier = config
        .jwt
        .as_ref()
        .map(|jwt| Arc::new(TokenVerifier::new(&jwt.secret)));
    let limiter = Arc::new(IpRateLimiter::from_config(&config.rate_limit));

    for path in &engine.namespaces {
        let namespace = node
            .of(path)
            .await
            .map_err(|e| AppError::InvalidNamespace {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        namespace
            .pipeline()
            .use_stage(rate_limit_stage(limiter.clone()));
        if let Some(verifier) = &verifier {
            namespace.pipeline().use_stage(token_stage(verifier.clone()));
        }
        handlers::register(&namespace).map_err(AppError::internal)?;

        tracing::info!(
            ns = %namespace.name(),
            auth = verifier.is_some(),
            "Namespace ready"
        );
    }

    Ok(node)
}

/// Run the complete gateway server with configuration
///
/// Returns after a shutdown signal once the node has closed every
/// connection and the listener has stopped.
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let node = build_node(&config).await?;

    let addr = config.gateway.address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| AppError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let app = create_app(GatewayState::new(node.clone(), config));
    let acceptor = ServerAcceptor::serve(listener, app).map_err(AppError::internal)?;
    node.set_acceptor(acceptor);

    shutdown_signal().await;

    tracing::info!("Shutting down gateway...");
    node.close().await.map_err(AppError::internal)?;
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received terminate signal"),
    }
}
