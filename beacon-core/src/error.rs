//! Error types for beacon-core

use thiserror::Error;

/// Main error type for the beacon-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Delivery to the collector failed (network error, timeout, unreadable body)
    #[error("transport error: {0}")]
    Transport(String),

    /// Backup storage error
    #[error("backup error: {0}")]
    Backup(String),

    /// No async runtime available to drive delivery
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for beacon-core
pub type Result<T> = std::result::Result<T, Error>;
