//! Per-session identity cache.

use crate::{DataStoreError, DataStoreResult, Session};
use hearth_model::ManagedObject;
use hearth_types::{IdentityKey, ObjectId};
use std::collections::HashMap;
use tracing::debug;

/// Maps identity keys to the object a session resolved them to.
///
/// Entries are advisory. The owning session validates every hit against
/// its own deletions and against resolvability before handing it out, and
/// evicts entries that fail. There is no size bound: the cache lives and
/// dies with its session.
#[derive(Debug, Clone, Default)]
pub struct IdentityCache {
    entries: HashMap<IdentityKey, ObjectId>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` under `key`, replacing any previous entry.
    pub fn put(&mut self, key: IdentityKey, id: ObjectId) -> Option<ObjectId> {
        self.entries.insert(key, id)
    }

    pub fn get(&self, key: &IdentityKey) -> Option<ObjectId> {
        self.entries.get(key).copied()
    }

    pub fn remove(&mut self, key: &IdentityKey) -> Option<ObjectId> {
        self.entries.remove(key)
    }

    /// Drops every entry pointing at `id`. Returns how many were dropped.
    pub fn evict_object(&mut self, id: &ObjectId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached != id);
        before - self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Session {
    /// Registers `object` under `key` in this session's cache.
    pub fn cache_put(&self, key: IdentityKey, object: &ManagedObject) -> DataStoreResult<()> {
        self.guard()?;
        if key.entity != object.entity {
            return Err(DataStoreError::ValidationFailed(format!(
                "cannot cache a {} object under {key}",
                object.entity
            )));
        }
        self.state().cache.put(key, object.id);
        Ok(())
    }

    /// Returns the cached object for `key`, if it is still visible.
    pub fn cache_get(&self, key: &IdentityKey) -> DataStoreResult<Option<ManagedObject>> {
        self.guard()?;
        self.cached(key)
    }

    pub fn cache_remove(&self, key: &IdentityKey) -> DataStoreResult<Option<ObjectId>> {
        self.guard()?;
        Ok(self.state().cache.remove(key))
    }

    /// Every key currently cached, sorted.
    pub fn cache_keys(&self) -> DataStoreResult<Vec<IdentityKey>> {
        self.guard()?;
        let mut keys: Vec<_> = self.state().cache.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Cache lookup with hit validation. Stale entries are evicted.
    pub(crate) fn cached(&self, key: &IdentityKey) -> DataStoreResult<Option<ManagedObject>> {
        let (id, deleted) = {
            let state = self.state();
            match state.cache.get(key) {
                Some(id) => (id, state.changes.is_deleted(&id)),
                None => return Ok(None),
            }
        };
        let found = if deleted { None } else { self.resolve(&id)? };
        if found.is_none() {
            self.state().cache.remove(key);
            debug!(session = %self.id(), %key, "Evicted stale cache entry");
        }
        Ok(found)
    }
}
