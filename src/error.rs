//! Error types for the eventstream service.

use std::error::Error as StdError;
use std::fmt;
use std::result;

/// A specialized Result type for eventstream operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for eventstream operations.
#[derive(Debug)]
pub enum Error {
    /// Upstream authentication failure; aborts the sync pass
    Authentication(String),
    /// Upstream fetch failure (definitions, occurrences, samples)
    UpstreamFetch(String),
    /// A sync is already running; the trigger is rejected, never queued
    SyncInProgress,
    /// Storage backend errors
    Storage(String),
    /// Configuration errors
    Config(String),
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Invalid data errors
    InvalidData(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Authentication(msg) => write!(f, "Authentication error: {}", msg),
            Error::UpstreamFetch(msg) => write!(f, "Upstream fetch error: {}", msg),
            Error::SyncInProgress => write!(f, "A sync is already running"),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16() == 401).unwrap_or(false) {
            Error::Authentication(err.to_string())
        } else {
            Error::UpstreamFetch(err.to_string())
        }
    }
}
