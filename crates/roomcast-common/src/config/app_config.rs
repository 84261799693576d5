//! Application configuration structs
//!
//! Loads configuration from environment variables, with `.env` support.

use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: ServerConfig,
    /// `None` runs a single node with in-memory adapters
    pub redis: Option<RedisConfig>,
    pub engine: EngineConfig,
    /// `None` disables token admission
    pub jwt: Option<JwtConfig>,
    pub rate_limit: RateLimitConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            _ => Err(()),
        }
    }
}

/// Listen address of the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
}

/// Broadcast engine tuning
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Heartbeat period in seconds; zero disables the ticker
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Namespaces registered at boot
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,
    /// Grace period before an empty room is deleted; unset deletes immediately
    #[serde(default)]
    pub room_empty_grace_secs: Option<u64>,
    #[serde(default = "default_event_max_listeners")]
    pub event_max_listeners: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            namespaces: default_namespaces(),
            room_empty_grace_secs: None,
            event_max_listeners: default_event_max_listeners(),
        }
    }
}

/// JWT configuration
#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig").finish_non_exhaustive()
    }
}

/// Per-IP connection rate limiting
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_second")]
    pub per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            burst: default_burst(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "roomcast".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_redis_max_connections() -> u32 {
    10
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_namespaces() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_event_max_listeners() -> usize {
    100
}

fn default_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    50
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a value does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a value does not parse
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        Ok(Self {
            app: AppSettings {
                name: vars.string("APP_NAME").unwrap_or_else(default_app_name),
                env: vars.parse("APP_ENV")?.unwrap_or_else(default_env),
            },
            gateway: ServerConfig {
                host: vars.string("GATEWAY_HOST").unwrap_or_else(default_host),
                port: vars
                    .parse("GATEWAY_PORT")?
                    .ok_or(ConfigError::MissingVar("GATEWAY_PORT"))?,
            },
            redis: match vars.string("REDIS_URL") {
                Some(url) => Some(RedisConfig {
                    url,
                    max_connections: vars
                        .parse("REDIS_MAX_CONNECTIONS")?
                        .unwrap_or_else(default_redis_max_connections),
                }),
                None => None,
            },
            engine: EngineConfig {
                heartbeat_interval_secs: vars
                    .parse("HEARTBEAT_INTERVAL_SECS")?
                    .unwrap_or_else(default_heartbeat_interval_secs),
                namespaces: vars
                    .string("NAMESPACES")
                    .map(|s| {
                        s.split(',')
                            .map(str::trim)
                            .filter(|ns| !ns.is_empty())
                            .map(String::from)
                            .collect::<Vec<_>>()
                    })
                    .filter(|list| !list.is_empty())
                    .unwrap_or_else(default_namespaces),
                room_empty_grace_secs: vars.parse("ROOM_EMPTY_GRACE_SECS")?,
                event_max_listeners: vars
                    .parse("EVENT_MAX_LISTENERS")?
                    .unwrap_or_else(default_event_max_listeners),
            },
            jwt: vars.string("JWT_SECRET").map(|secret| JwtConfig { secret }),
            rate_limit: RateLimitConfig {
                per_second: vars
                    .parse("RATE_LIMIT_PER_SECOND")?
                    .unwrap_or_else(default_per_second),
                burst: vars
                    .parse("RATE_LIMIT_BURST")?
                    .unwrap_or_else(default_burst),
            },
        })
    }
}

/// Variable source; blank values count as unset
struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.string(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key, value))
            })
            .transpose()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
