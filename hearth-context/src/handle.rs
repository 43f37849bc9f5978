//! The persistent store handle and its lifecycle notifications.

use crate::{ControllerConfig, DataStoreError, DataStoreResult};
use hearth_model::Model;
use hearth_store::{SqliteStore, StorageError};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const NOTIFICATION_CAPACITY: usize = 16;

/// Store lifecycle events, sent before and after the backing file is
/// cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLifecycleEvent {
    WillClearDatabase,
    DidClearDatabase,
    WillClearIncompatibleDatabase,
    DidClearIncompatibleDatabase,
}

/// Broadcast channel for [`StoreLifecycleEvent`]s.
///
/// Create one up front and pass it to
/// [`DataStoreController::open_with_notifications`](crate::DataStoreController::open_with_notifications)
/// to observe the events emitted while opening.
#[derive(Debug, Clone)]
pub struct StoreNotifications {
    sender: broadcast::Sender<StoreLifecycleEvent>,
}

impl StoreNotifications {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreLifecycleEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: StoreLifecycleEvent) {
        // No subscribers is fine.
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(?event, receivers, "Store lifecycle event");
    }
}

impl Default for StoreNotifications {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the single backing store of a controller.
///
/// Every session records the generation it was created under. Clearing the
/// store bumps the generation, which makes every older session unusable.
pub struct StoreHandle {
    identifier: String,
    path: PathBuf,
    model: Arc<Model>,
    store: RwLock<Option<SqliteStore>>,
    generation: AtomicU64,
}

impl StoreHandle {
    /// Opens the store file, clearing it first if it was written by an
    /// incompatible model.
    pub(crate) fn open(
        config: &ControllerConfig,
        model: Arc<Model>,
        notifications: &StoreNotifications,
    ) -> DataStoreResult<Self> {
        let path = config.store_path();
        let store = match SqliteStore::open(&path, model.clone()) {
            Ok(store) => store,
            Err(StorageError::IncompatibleSchema { expected, found }) => {
                warn!(
                    path = %path.display(), %expected, %found,
                    "Store is incompatible with the model, clearing it"
                );
                notifications.emit(StoreLifecycleEvent::WillClearIncompatibleDatabase);
                SqliteStore::destroy(&path)?;
                let store = SqliteStore::open(&path, model.clone())
                    .map_err(|e| DataStoreError::SchemaIncompatible(e.to_string()))?;
                notifications.emit(StoreLifecycleEvent::DidClearIncompatibleDatabase);
                store
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            identifier: config.identifier.clone(),
            path,
            model,
            store: RwLock::new(Some(store)),
            generation: AtomicU64::new(0),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns true if the store is open.
    pub fn is_available(&self) -> bool {
        self.store.read().is_some()
    }

    /// Runs `f` against the open store on behalf of a session of
    /// `generation`.
    pub(crate) fn with_store<T>(
        &self,
        generation: u64,
        f: impl FnOnce(&SqliteStore) -> DataStoreResult<T>,
    ) -> DataStoreResult<T> {
        let guard = self.store.read();
        // Checked under the lock so a clear cannot slip in between.
        if generation != self.generation() {
            return Err(stale(generation));
        }
        match guard.as_ref() {
            Some(store) => f(store),
            None => Err(DataStoreError::StoreUnavailable(format!(
                "store '{}' has been deleted",
                self.identifier
            ))),
        }
    }

    /// Fails unless a session of `generation` may still be used.
    pub(crate) fn check_generation(&self, generation: u64) -> DataStoreResult<()> {
        self.with_store(generation, |_| Ok(()))
    }

    /// Tears down the backing file and optionally recreates it empty.
    /// Returns the new generation.
    ///
    /// Older sessions are invalidated even when this fails. If the file
    /// cannot be removed the old store is reopened when possible.
    pub(crate) fn clear(&self, recreate: bool) -> DataStoreResult<u64> {
        let mut guard = self.store.write();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        drop(guard.take());
        if let Err(e) = SqliteStore::destroy(&self.path) {
            warn!(
                store = %self.identifier, generation,
                "Could not remove the store file, reopening it: {}", e
            );
            *guard = match SqliteStore::open(&self.path, self.model.clone()) {
                Ok(store) => Some(store),
                Err(reopen) => {
                    warn!(store = %self.identifier, "Store stays closed: {}", reopen);
                    None
                }
            };
            return Err(e.into());
        }
        if recreate {
            *guard = Some(SqliteStore::open(&self.path, self.model.clone())?);
        }
        info!(
            store = %self.identifier, generation, recreate,
            "Cleared persistent store"
        );
        Ok(generation)
    }
}

fn stale(generation: u64) -> DataStoreError {
    DataStoreError::StoreUnavailable(format!(
        "session from store generation {generation} outlived a reset"
    ))
}
