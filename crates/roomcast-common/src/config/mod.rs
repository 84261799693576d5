//! Configuration structs

mod app_config;

pub use app_config::{
    AppConfig, AppSettings, ConfigError, EngineConfig, Environment, JwtConfig, RateLimitConfig,
    RedisConfig, ServerConfig,
};
