//! Crate-wide error type.
//!
//! Every fallible operation in the watcher, the store, the queue and the
//! delivery transports returns [`Result`].  The binary entry point wraps these
//! in [`anyhow`] for top-level context only.

use std::path::Path;

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{operation} '{path}': {source}")]
    Io {
        operation: &'static str,
        path: String,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid feed url '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("Invalid filter '{pattern}': {source}")]
    Filter {
        pattern: String,
        source: regex::Error,
    },

    #[error("Fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Feed could not be parsed: {0}")]
    Parse(#[from] rss::Error),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Notification queue is closed")]
    QueueClosed,
}

impl Error {
    pub fn io(operation: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
