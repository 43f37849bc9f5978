//! SQLite object store for Hearth.
//!
//! The session layer treats this crate as an opaque engine: it opens a
//! store for a [`Model`](hearth_model::Model), runs fetches, and commits
//! batches of inserts, updates and deletes atomically.
//!
//! # Architecture
//!
//! - Objects are stored as JSON documents in a single `objects` table
//!   keyed by object id and indexed by entity name
//! - Predicates and sort orders are evaluated in process after the
//!   entity's rows are loaded
//! - The model fingerprint is recorded in `store_metadata`; opening the
//!   file with a different model reports [`StorageError::IncompatibleSchema`]

mod error;
mod request;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use request::{CommitBatch, FetchRequest};
pub use sqlite::SqliteStore;
