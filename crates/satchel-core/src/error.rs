//! Error types for satchel-core

use thiserror::Error;

/// Result type alias using satchel-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in satchel-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Payload rejected before any state change
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Mutation on an unknown or tombstoned record
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Remote call failed; retried with backoff, never surfaced as data loss
    #[error("Transport error: {0}")]
    Transport(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
