//! Health, stats and presence endpoints

use crate::server::GatewayState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use roomcast_common::{AppError, ErrorResponse};
use roomcast_core::{normalize_path, NodeStats};
use serde::{Deserialize, Serialize};

/// API error wrapper rendering [`AppError`] as JSON
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = ?self.0, "Server error occurred");
        }

        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

/// Liveness response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub node_id: String,
    pub started_at: DateTime<Utc>,
    pub connections: usize,
}

/// Basic health check
///
/// GET /health
pub async fn health_check(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let node = state.node();
    let stats = node.stats();

    Json(HealthResponse {
        status: if node.is_closed() { "closing" } else { "ok" },
        node_id: stats.node_id,
        started_at: stats.created_at,
        connections: stats.connections,
    })
}

/// Node counters
///
/// GET /stats
pub async fn stats(State(state): State<GatewayState>) -> Json<NodeStats> {
    Json(state.node().stats())
}

#[derive(Debug, Deserialize)]
pub struct ClientsQuery {
    #[serde(default)]
    pub ns: Option<String>,
}

/// Cluster-wide client list of a namespace
#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    pub namespace: String,
    pub clients: Vec<String>,
}

/// Client IDs of a namespace, from the state adapter when one is configured
///
/// GET /clients?ns=/chat
pub async fn clients(
    State(state): State<GatewayState>,
    Query(query): Query<ClientsQuery>,
) -> ApiResult<Json<ClientsResponse>> {
    let namespace = normalize_path(query.ns.as_deref().unwrap_or("/"));
    if state.node().namespace(&namespace).is_none() {
        return Err(AppError::UnknownNamespace(namespace).into());
    }

    let clients = state.node().namespace_clients(&namespace).await;
    Ok(Json(ClientsResponse { namespace, clients }))
}
