//! Core type definitions for Hearth.
//!
//! This crate defines the small, store-agnostic vocabulary shared by every
//! other Hearth crate:
//! - Object, session and watcher identifiers
//! - [`IdentityKey`], the (entity, identity value, group) triple used to
//!   deduplicate objects during find-or-create
//! - [`DispatchTier`], the execution queues sessions are bound to

mod identity;
mod ids;
mod tier;

pub use identity::IdentityKey;
pub use ids::{ObjectId, SessionId, WatcherId};
pub use tier::DispatchTier;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown dispatch tier: {0}")]
    UnknownTier(String),
}
