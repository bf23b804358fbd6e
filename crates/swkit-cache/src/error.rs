//! Storage errors.

use thiserror::Error;

/// Errors raised by a cache storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache not found: {0}")]
    NotFound(String),

    #[error("Invalid cache name: {0}")]
    InvalidName(String),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}
