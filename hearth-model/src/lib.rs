//! Object model for Hearth.
//!
//! Defines the types every Hearth subsystem exchanges:
//! - [`ManagedObject`]: a stored object (id, entity name, JSON payload, timestamps)
//! - [`Model`]: the schema descriptor: entities, their properties, fetch templates
//! - [`Predicate`] / [`SortDescriptor`]: in-process filtering and ordering
//! - [`ValidationHandler`]: optional per-entity validation hooks
//! - [`ModelRecord`]: typed records that map onto a single entity
//!
//! The store engine, the session layer and the import pipeline all speak in
//! these terms; none of them knows what the JSON payload means beyond what
//! the [`Model`] declares.

mod error;
mod handler;
mod object;
mod predicate;
mod record;
mod schema;

pub use error::{ModelError, ModelResult};
pub use handler::ValidationHandler;
pub use object::{ManagedObject, Record, now_millis};
pub use predicate::{Comparison, Predicate, SortDescriptor, compare_values};
pub use record::{IdentityParameters, ModelRecord};
pub use schema::{EntityDescription, FetchTemplate, Model, PropertyDescription, PropertyType};
