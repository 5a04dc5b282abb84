//! Error types for the store crate.

use thiserror::Error;

/// Errors that can occur in the store crate.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A blocking query task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
