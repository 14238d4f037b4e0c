//! Tracing subscriber setup
//!
//! The library only emits `tracing` events. Embedders call [`init`] once, or
//! install their own subscriber.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{level}': {reason}")]
    InvalidLevel { level: String, reason: String },

    #[error("failed to open log file '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (e.g. "info", "epochrep=debug")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// `RUST_LOG` wins over the configured level when set.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        EnvFilter::try_from_default_env().or_else(|_| {
            EnvFilter::try_new(&self.level).map_err(|e| LoggingError::InvalidLevel {
                level: self.level.clone(),
                reason: e.to_string(),
            })
        })
    }
}

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()
        }
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
    tracing::debug!(level = %config.level, "logging initialized");
    Ok(())
}
