//! Process-wide logging setup.
//!
//! Only the binary calls [`init_tracing`]. Library code never touches the
//! global subscriber: it logs through `tracing` macros and inherits context
//! from the span it runs in (a tester session, a server request).

use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the log level.
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

/// Environment variable selecting the log format.
pub const LOG_FORMAT_VAR: &str = "LOG_FORMAT";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogConfigError {
    #[error("LOG_LEVEL must be one of: debug, info, warn, error (got '{0}')")]
    InvalidLevel(String),

    #[error("LOG_FORMAT must be json or text (got '{0}')")]
    InvalidFormat(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Filter directive for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the log stream (always written to stderr).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: LogLevel,
    /// Emit JSON-formatted logs instead of human readable text
    pub format: LogFormat,
}

impl LogConfig {
    /// Load logging configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `LOG_LEVEL` or `LOG_FORMAT` holds an unknown value.
    pub fn from_env() -> Result<Self, LogConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load logging configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if `LOG_LEVEL` or `LOG_FORMAT` holds an unknown value.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, LogConfigError> {
        let level = match vars.get(LOG_LEVEL_VAR) {
            None => LogLevel::default(),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "debug" => LogLevel::Debug,
                "info" => LogLevel::Info,
                "warn" => LogLevel::Warn,
                "error" => LogLevel::Error,
                _ => return Err(LogConfigError::InvalidLevel(value.clone())),
            },
        };

        let format = match vars.get(LOG_FORMAT_VAR).map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(LogConfigError::InvalidFormat(other.to_string())),
        };

        Ok(Self { level, format })
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG`, when set, takes precedence over the configured level so a
/// full per-target filter can be supplied for debugging.
///
/// # Errors
///
/// Returns [`LogConfigError::Install`] if a global subscriber is already set.
pub fn init_tracing(config: &LogConfig) -> Result<(), LogConfigError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| LogConfigError::Install(e.to_string()))
}
