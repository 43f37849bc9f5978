//! Working sessions.
//!
//! A session is a unit-of-work scope bound to one dispatch tier. It sees
//! its parent's state (or, at the root, the store) overlaid with its own
//! pending inserts, updates and deletes. Nothing it does is visible to
//! anyone else until it saves.

use crate::cache::IdentityCache;
use crate::changes::{Lookup, PendingChanges};
use crate::dispatch::Dispatcher;
use crate::handle::StoreHandle;
use crate::observer::ObserverRegistry;
use crate::{DataStoreError, DataStoreResult};
use hearth_model::{ManagedObject, Model, Record, ValidationHandler};
use hearth_store::FetchRequest;
use hearth_types::{DispatchTier, ObjectId, SessionId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// State shared by every session of one controller.
pub(crate) struct Shared {
    pub store: StoreHandle,
    pub observers: ObserverRegistry,
    pub dispatcher: Dispatcher,
    pub handlers: RwLock<HashMap<String, Arc<dyn ValidationHandler>>>,
    pub enforce_tier_confinement: bool,
}

impl Shared {
    pub fn handler(&self, entity: &str) -> Option<Arc<dyn ValidationHandler>> {
        self.handlers.read().get(entity).cloned()
    }
}

#[derive(Clone, Default)]
pub(crate) struct SessionState {
    pub changes: PendingChanges,
    pub cache: IdentityCache,
}

struct SessionInner {
    id: SessionId,
    tier: DispatchTier,
    parent: Option<Session>,
    generation: u64,
    shared: Arc<Shared>,
    state: Mutex<SessionState>,
}

/// A unit-of-work scope bound to one dispatch tier.
///
/// `Session` is a cheap handle; clones refer to the same session. Every
/// operation except the plain accessors must be called from the session's
/// own tier (see
/// [`DataStoreController::perform_work`](crate::DataStoreController::perform_work))
/// and fails with [`DataStoreError::StoreUnavailable`] once the store has
/// been reset or deleted.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("tier", &self.inner.tier)
            .field("parent", &self.inner.parent.as_ref().map(Session::id))
            .field("generation", &self.inner.generation)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>, tier: DispatchTier, parent: Option<Session>) -> Self {
        let generation = shared.store.generation();
        let session = Self {
            inner: Arc::new(SessionInner {
                id: SessionId::next(),
                tier,
                parent,
                generation,
                shared,
                state: Mutex::new(SessionState::default()),
            }),
        };
        debug!(
            session = %session.id(), %tier,
            parent = ?session.parent().map(Session::id),
            "Session created"
        );
        session
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn tier(&self) -> DispatchTier {
        self.inner.tier
    }

    pub fn parent(&self) -> Option<&Session> {
        self.inner.parent.as_ref()
    }

    /// Returns true for the session that writes to the store.
    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Store generation this session was created under.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn model(&self) -> &Arc<Model> {
        self.inner.shared.store.model()
    }

    /// Returns false once the store has been reset or deleted.
    pub fn is_valid(&self) -> bool {
        self.inner
            .shared
            .store
            .check_generation(self.inner.generation)
            .is_ok()
    }

    /// Returns true if the session has unsaved changes.
    pub fn has_changes(&self) -> bool {
        !self.inner.state.lock().changes.is_empty()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.shared.dispatcher
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.inner.shared, shared)
    }

    pub(crate) fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock()
    }

    /// Fails unless the session is live and called from its own tier.
    pub(crate) fn guard(&self) -> DataStoreResult<()> {
        self.inner
            .shared
            .store
            .check_generation(self.inner.generation)?;
        if self.inner.shared.enforce_tier_confinement && !self.dispatcher().is_current(self.tier())
        {
            return Err(DataStoreError::WrongTier {
                expected: self.tier(),
                actual: self.dispatcher().current_tier(),
            });
        }
        Ok(())
    }

    // ── Objects ──────────────────────────────────────────────────

    /// Inserts a new object of `entity`, starting from the entity's
    /// defaults overlaid with `values`.
    pub fn create(&self, entity: &str, values: Record) -> DataStoreResult<ManagedObject> {
        self.guard()?;
        let description = self.model().require_entity(entity)?;
        let mut data = description.initial_data();
        data.extend(values);
        let object = ManagedObject::with_data(entity, data);
        self.state().changes.record_insert(object.clone());
        debug!(session = %self.id(), %entity, id = %object.id, "Object inserted");
        Ok(object)
    }

    /// Looks an object up by id.
    pub fn object(&self, id: &ObjectId) -> DataStoreResult<Option<ManagedObject>> {
        self.guard()?;
        self.resolve(id)
    }

    /// Like [`object`](Session::object) but fails if the object is not
    /// visible.
    pub fn existing_object(&self, id: &ObjectId) -> DataStoreResult<ManagedObject> {
        self.object(id)?
            .ok_or(DataStoreError::ObjectNotFound(*id))
    }

    /// Own changes first, then the parent chain, then the store.
    pub(crate) fn resolve(&self, id: &ObjectId) -> DataStoreResult<Option<ManagedObject>> {
        let lookup = self.state().changes.lookup(id);
        match lookup {
            Lookup::Found(object) => Ok(Some(object)),
            Lookup::Deleted => Ok(None),
            Lookup::Unknown => match &self.inner.parent {
                Some(parent) => parent.resolve(id),
                None => self.load(id),
            },
        }
    }

    fn load(&self, id: &ObjectId) -> DataStoreResult<Option<ManagedObject>> {
        let loaded = self
            .inner
            .shared
            .store
            .with_store(self.inner.generation, |store| {
                store.fetch_by_id(id).map_err(DataStoreError::from_fetch)
            })?;
        Ok(loaded.map(|object| self.after_load(object)))
    }

    fn after_load(&self, mut object: ManagedObject) -> ManagedObject {
        if let Some(handler) = self.inner.shared.handler(&object.entity) {
            handler.on_after_load(&mut object);
        }
        object
    }

    /// Writes an edited snapshot back. Returns the keys that changed.
    pub fn update(&self, object: &ManagedObject) -> DataStoreResult<BTreeSet<String>> {
        self.guard()?;
        let current = self
            .resolve(&object.id)?
            .ok_or(DataStoreError::ObjectNotFound(object.id))?;

        let keys = changed_keys(&current.data, &object.data);
        if keys.is_empty() {
            return Ok(keys);
        }

        let mut updated = current;
        updated.data = object.data.clone();
        updated.modified_at = hearth_model::now_millis();
        let mut state = self.state();
        state.changes.record_update(updated, keys.clone());
        debug!(session = %self.id(), id = %object.id, ?keys, "Object updated");
        Ok(keys)
    }

    /// Sets one property. Returns true if the value changed.
    pub fn set_value(&self, id: &ObjectId, key: &str, value: Value) -> DataStoreResult<bool> {
        let mut object = self.existing_object(id)?;
        if !object.set(key, value) {
            return Ok(false);
        }
        Ok(!self.update(&object)?.is_empty())
    }

    /// Sets several properties at once. Returns the keys that changed.
    pub fn set_values(&self, id: &ObjectId, values: &Record) -> DataStoreResult<BTreeSet<String>> {
        let mut object = self.existing_object(id)?;
        for (key, value) in values {
            object.set(key, value.clone());
        }
        self.update(&object)
    }

    /// Deletes an object. Returns false if it was not visible.
    pub fn delete(&self, id: &ObjectId) -> DataStoreResult<bool> {
        self.guard()?;
        let Some(snapshot) = self.resolve(id)? else {
            return Ok(false);
        };
        let mut state = self.state();
        state.changes.record_delete(snapshot);
        let evicted = state.cache.evict_object(id);
        debug!(session = %self.id(), %id, evicted, "Object deleted");
        Ok(true)
    }

    /// Discards every unsaved change.
    pub fn rollback(&self) -> DataStoreResult<()> {
        self.guard()?;
        let mut state = self.state();
        let discarded = std::mem::take(&mut state.changes);
        for object in discarded.inserted() {
            state.cache.evict_object(&object.id);
        }
        debug!(session = %self.id(), "Changes rolled back");
        Ok(())
    }

    // ── Fetch ────────────────────────────────────────────────────

    /// Runs a fetch against this session's view of the store.
    pub fn fetch(&self, request: &FetchRequest) -> DataStoreResult<Vec<ManagedObject>> {
        self.guard()?;
        self.model().require_entity(&request.entity)?;
        let unbounded = FetchRequest {
            limit: None,
            ..request.clone()
        };
        let objects = self.collect(&unbounded)?;
        Ok(request.finish(objects))
    }

    /// Runs a fetch and returns its first result.
    pub fn fetch_single(&self, request: &FetchRequest) -> DataStoreResult<Option<ManagedObject>> {
        let request = request.clone().with_limit(1);
        Ok(self.fetch(&request)?.into_iter().next())
    }

    /// Number of objects a fetch would return.
    pub fn count(&self, request: &FetchRequest) -> DataStoreResult<usize> {
        Ok(self.fetch(request)?.len())
    }

    fn collect(&self, request: &FetchRequest) -> DataStoreResult<Vec<ManagedObject>> {
        let base = match &self.inner.parent {
            Some(parent) => parent.collect(request)?,
            None => self
                .inner
                .shared
                .store
                .with_store(self.inner.generation, |store| {
                    store.fetch(request).map_err(DataStoreError::from_fetch)
                })?
                .into_iter()
                .map(|object| self.after_load(object))
                .filter(|object| request.matches(object))
                .collect(),
        };

        let state = self.state();
        let changes = &state.changes;
        let mut objects: Vec<ManagedObject> = base
            .into_iter()
            .filter(|o| !changes.touches(&o.id))
            .collect();
        objects.extend(changes.live_objects().filter(|o| request.matches(o)).cloned());
        Ok(objects)
    }
}

/// Top-level keys whose values differ between two payloads.
pub(crate) fn changed_keys(before: &Value, after: &Value) -> BTreeSet<String> {
    let empty = serde_json::Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);
    before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect()
}
