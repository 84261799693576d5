//! Gateway error types
//!
//! Startup failures, admission rejections and status endpoint errors all
//! funnel through [`AppError`]. Admission stages only use the display text,
//! which becomes the WebSocket close reason.

use crate::auth::AuthError;
use crate::config::ConfigError;
use serde::Serialize;

/// Gateway-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Missing authentication")]
    MissingToken,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Invalid namespace {path}: {reason}")]
    InvalidNamespace { path: String, reason: String },

    #[error("Redis unavailable: {0}")]
    Redis(String),

    #[error("Failed to bind to {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    /// HTTP status for the status endpoints
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingToken => 401,
            Self::Auth(AuthError::Encoding(_)) => 500,
            Self::Auth(_) => 401,
            Self::RateLimited => 429,
            Self::UnknownNamespace(_) => 404,
            Self::InvalidNamespace { .. } => 400,
            Self::Redis(_) => 503,
            Self::Bind { .. } | Self::Config(_) | Self::Internal(_) => 500,
        }
    }

    /// Machine-readable code
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "MISSING_AUTH",
            Self::Auth(AuthError::TokenExpired) => "TOKEN_EXPIRED",
            Self::Auth(AuthError::Encoding(_)) => "INTERNAL_ERROR",
            Self::Auth(_) => "INVALID_TOKEN",
            Self::RateLimited => "RATE_LIMIT_EXCEEDED",
            Self::UnknownNamespace(_) => "NOT_FOUND",
            Self::InvalidNamespace { .. } => "INVALID_NAMESPACE",
            Self::Redis(_) => "REDIS_UNAVAILABLE",
            Self::Bind { .. } => "BIND_FAILED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for 5xx statuses
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    pub fn redis(err: impl std::fmt::Display) -> Self {
        Self::Redis(err.to_string())
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

/// JSON body of a failed status request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.error_code(),
            message: err.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_map_to_401() {
        assert_eq!(AppError::MissingToken.status_code(), 401);
        assert_eq!(AppError::from(AuthError::InvalidToken).status_code(), 401);

        let expired = AppError::from(AuthError::TokenExpired);
        assert_eq!(expired.status_code(), 401);
        assert_eq!(expired.error_code(), "TOKEN_EXPIRED");
        assert_eq!(expired.to_string(), "Token expired");

        assert_eq!(
            AppError::from(AuthError::MissingSubject).error_code(),
            "INVALID_TOKEN"
        );
    }

    #[test]
    fn test_startup_errors_are_server_errors() {
        let bind = AppError::Bind {
            addr: "0.0.0.0:80".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(bind.is_server_error());
        assert_eq!(bind.to_string(), "Failed to bind to 0.0.0.0:80");

        assert_eq!(AppError::redis("refused").status_code(), 503);
        assert!(!AppError::RateLimited.is_server_error());
        assert!(AppError::internal(anyhow::anyhow!("boom")).is_server_error());
    }

    #[test]
    fn test_config_error_is_transparent() {
        let err = AppError::from(ConfigError::MissingVar("GATEWAY_PORT"));
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: GATEWAY_PORT"
        );
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_error_response() {
        let err = AppError::UnknownNamespace("/chat".to_string());
        let response = ErrorResponse::from(&err);

        assert_eq!(response.code, "NOT_FOUND");
        assert_eq!(response.message, "Unknown namespace: /chat");
    }
}
