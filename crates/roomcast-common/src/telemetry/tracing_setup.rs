//! Tracing and logging setup
//!
//! `RUST_LOG` wins when set; otherwise the configured default directives
//! apply. `LOG_FORMAT` (`pretty`, `compact`, `json`) overrides the format
//! picked for the environment.

use crate::config::Environment;
use std::str::FromStr;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Directives used when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVES: &str = "info,tower_http=info";

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TracingError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub directives: String,
    pub format: LogFormat,
    /// Log span open and close, useful to follow a connection's lifetime
    pub span_events: bool,
    pub file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            directives: DEFAULT_DIRECTIVES.to_string(),
            format: LogFormat::Compact,
            span_events: false,
            file_line: true,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn for_environment(env: Environment) -> Self {
        match env {
            Environment::Development => Self {
                directives: "debug,roomcast_core=trace".to_string(),
                format: LogFormat::Pretty,
                span_events: true,
                file_line: true,
            },
            Environment::Staging => Self::default(),
            Environment::Production => Self {
                format: LogFormat::Json,
                file_line: false,
                ..Self::default()
            },
        }
    }

    /// Apply the `LOG_FORMAT` override, if any
    pub fn with_env_format(mut self) -> Result<Self, TracingError> {
        if let Ok(value) = std::env::var("LOG_FORMAT") {
            self.format = value.parse()?;
        }
        Ok(self)
    }
}

/// Install the global subscriber
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.directives))
        .map_err(|e| TracingError::Directives(e.to_string()))?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer = fmt::layer()
        .with_file(config.file_line)
        .with_line_number(config.file_line)
        .with_span_events(span_events);

    let fmt_layer = match config.format {
        LogFormat::Pretty => fmt_layer.pretty().boxed(),
        LogFormat::Compact => fmt_layer.compact().boxed(),
        LogFormat::Json => fmt_layer.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|_| TracingError::AlreadyInitialized)
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Tracing subscriber already initialized")]
    AlreadyInitialized,

    #[error("Invalid log directives: {0}")]
    Directives(String),

    #[error("Unknown log format: {0}")]
    UnknownFormat(String),
}
