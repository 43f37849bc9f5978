//! Error types for the coordination layer.

use hearth_model::ModelError;
use hearth_store::StorageError;
use hearth_types::{DispatchTier, IdentityKey, ObjectId};
use thiserror::Error;

/// Result type for data store operations.
pub type DataStoreResult<T> = Result<T, DataStoreError>;

/// Errors that can occur while coordinating sessions over a store.
#[derive(Debug, Error)]
pub enum DataStoreError {
    /// The store was torn down, or the session outlived a reset.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store file does not match the model.
    #[error("incompatible store schema: {0}")]
    SchemaIncompatible(String),

    /// A save was rejected. Pending changes are kept.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A query against the store failed.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// An import record disagreed with the batch about its group.
    #[error("identity conflict for {key}: {message}")]
    IdentityConflict { key: IdentityKey, message: String },

    /// A session was used from a tier it is not bound to.
    #[error("session is bound to the {expected} tier, called from {}", describe_tier(.actual))]
    WrongTier {
        expected: DispatchTier,
        actual: Option<DispatchTier>,
    },

    /// A blocking wait would break the tier wait order.
    #[error("a {from} unit may not wait on the {to} tier")]
    WaitOrderViolation { from: DispatchTier, to: DispatchTier },

    /// No object with this id is visible to the session.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A work unit panicked.
    #[error("work unit panicked: {0}")]
    WorkPanicked(String),

    /// The tier's queue is gone.
    #[error("the {0} tier is no longer accepting work")]
    DispatcherClosed(DispatchTier),

    /// Error returned by a caller-supplied work unit.
    #[error("work failed: {0}")]
    Work(#[from] anyhow::Error),

    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Model error (unknown entity, template, ...).
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Invalid controller configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error (thread or runtime startup).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_tier(tier: &Option<DispatchTier>) -> String {
    match tier {
        Some(tier) => format!("the {tier} tier"),
        None => "outside any tier".to_string(),
    }
}

impl DataStoreError {
    /// Recovers a data store error that travelled through a work unit's
    /// `anyhow` boundary.
    pub fn from_work(err: anyhow::Error) -> Self {
        match err.downcast::<DataStoreError>() {
            Ok(err) => err,
            Err(err) => Self::Work(err),
        }
    }

    /// Maps a commit failure.
    pub(crate) fn from_commit(err: StorageError) -> Self {
        match err {
            StorageError::Constraint(message) => Self::ValidationFailed(message),
            StorageError::IncompatibleSchema { expected, found } => Self::SchemaIncompatible(
                format!("model fingerprint {found} does not match {expected}"),
            ),
            other => Self::Storage(other),
        }
    }

    /// Maps a fetch failure.
    pub(crate) fn from_fetch(err: StorageError) -> Self {
        Self::FetchFailed(err.to_string())
    }
}
