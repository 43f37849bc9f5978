//! Error types for the model layer.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while loading a model or checking objects against it.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The model file or a record payload is not valid JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The entity name is not declared in the model.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// No fetch template with this name exists.
    #[error("unknown fetch template: {0}")]
    UnknownTemplate(String),

    /// A `$VARIABLE` in a fetch template had no substitution value.
    #[error("missing substitution variable: {0}")]
    MissingVariable(String),

    /// An object does not satisfy its entity description.
    #[error("validation failed for {entity}: {message}")]
    Validation { entity: String, message: String },
}

impl ModelError {
    pub(crate) fn validation(entity: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            entity: entity.to_string(),
            message: message.into(),
        }
    }
}
