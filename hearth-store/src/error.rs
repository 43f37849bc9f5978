//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file was written by a different model.
    #[error("incompatible store: model fingerprint {found} does not match {expected}")]
    IncompatibleSchema { expected: String, found: String },

    /// A commit was rejected by the store's constraints.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Invalid data read back from the store.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
