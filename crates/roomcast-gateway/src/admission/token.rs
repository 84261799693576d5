//! Token admission

use super::Stage;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use roomcast_common::{AppError, TokenVerifier};
use roomcast_core::{AdmissionContext, AdmissionError, AdmissionResult, Next};
use std::sync::Arc;

/// Query parameter carrying the token
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Reject connections without a valid token; admit others as `sub`
pub fn token_stage(verifier: Arc<TokenVerifier>) -> impl Stage {
    move |ctx: AdmissionContext, next: Next| -> BoxFuture<'static, AdmissionResult> {
        let verifier = verifier.clone();
        async move {
            let Some(token) = ctx.query(TOKEN_QUERY_PARAM) else {
                return Err(AdmissionError::rejected(AppError::MissingToken.to_string()));
            };

            let claims = verifier.verify(token).map_err(|e| {
                tracing::debug!(conn_id = %ctx.connection.id(), error = %e, "Token rejected");
                AdmissionError::rejected(AppError::from(e).to_string())
            })?;

            ctx.connection.set_user_id(Some(claims.sub));
            next.run().await
        }
        .boxed()
    }
}
