//! Session coordination for Hearth stores.
//!
//! A [`DataStoreController`] owns one persistent store and coordinates
//! every piece of work that touches it.
//!
//! # Architecture
//!
//! Work runs on three dispatch tiers:
//!
//! - **Main**: a single ui-affinity thread running the main session
//! - **Background**: a single thread running the background session, the
//!   root of the hierarchy and the only writer of the store
//! - **Worker**: a pool; every worker submission gets a fresh session
//!
//! ## Saving
//!
//! A session sees its parent's state overlaid with its own pending
//! changes. Saving a child pushes its changes one level up, on the parent's
//! tier; saving the root commits to the store in one transaction and
//! publishes the committed change to the observers. Blocking waits only go
//! from worker to main to background, never back.
//!
//! ## Identity cache and import
//!
//! Each session keeps an identity cache keyed by
//! [`IdentityKey`](hearth_types::IdentityKey) (entity, identity value,
//! group). The import pipeline uses it to match incoming records against
//! existing objects, so re-importing the same batch updates in place
//! instead of duplicating.
//!
//! # Example
//!
//! ```no_run
//! use hearth_context::{ControllerConfig, DataStoreController, ObserverOptions, WorkParameters};
//! use hearth_model::{EntityDescription, Model, PropertyDescription};
//! use hearth_types::DispatchTier;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let model = Model::new("people", 1).with_entity(
//!     EntityDescription::new("Person")
//!         .with_property(PropertyDescription::string("id").required())
//!         .with_property(PropertyDescription::string("name"))
//!         .with_identity("id"),
//! );
//! let controller = DataStoreController::open(ControllerConfig::new("people"), model)?;
//!
//! let watcher = Arc::new(());
//! controller.add_observer(&watcher, ObserverOptions::for_entity("Person"), |_, change| {
//!     println!("{} people inserted", change.inserted.len());
//! });
//!
//! let work = WorkParameters::new(DispatchTier::Worker, |_, session, _| {
//!     let identity = session.identity_parameters("Person")?;
//!     let (person, _) = session.find_or_create(&identity, json!("a"), None)?;
//!     session.set_value(&person.id, "name", json!("Ada"))?;
//!     Ok(())
//! });
//! controller.perform_work(work.and_save().and_wait())?;
//! # Ok::<(), hearth_context::DataStoreError>(())
//! ```

mod cache;
mod changes;
mod config;
mod controller;
mod dispatch;
mod error;
mod handle;
mod import;
mod observer;
mod query;
mod records;
mod save;
mod session;
mod work;

pub use cache::IdentityCache;
pub use config::{ControllerConfig, ROOT_DIR_ENV};
pub use controller::DataStoreController;
pub use dispatch::Dispatcher;
pub use error::{DataStoreError, DataStoreResult};
pub use handle::{StoreHandle, StoreLifecycleEvent, StoreNotifications};
pub use import::{ImportConflict, ImportParameters, ImportReport, PostCreateFn};
pub use observer::{ChangeNotification, ObserverOptions, ObserverRegistry};
pub use save::ChangeEvent;
pub use session::Session;
pub use work::{PostSaveFn, WorkContext, WorkFn, WorkParameters};
