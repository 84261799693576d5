//! # roomcast-common
//!
//! Shared utilities including configuration, error handling, token verification, and telemetry.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::{AuthError, Claims, TokenVerifier};
pub use config::{
    AppConfig, AppSettings, ConfigError, EngineConfig, Environment, JwtConfig, RateLimitConfig,
    RedisConfig, ServerConfig,
};
pub use error::{AppError, AppResult, ErrorResponse};
pub use telemetry::{init_tracing, LogFormat, TracingConfig, TracingError};
