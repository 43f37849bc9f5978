//! Pending change tracking for one session.

use hearth_model::ManagedObject;
use hearth_types::ObjectId;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Change {
    Inserted,
    Updated(BTreeSet<String>),
}

/// What a session has changed relative to its parent.
///
/// Inserted and updated objects are kept in the order they were first
/// touched. Deleted objects keep their last known snapshot so observers can
/// still evaluate predicates against them.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingChanges {
    objects: HashMap<ObjectId, ManagedObject>,
    status: HashMap<ObjectId, Change>,
    order: Vec<ObjectId>,
    deleted: Vec<ManagedObject>,
    deleted_ids: HashSet<ObjectId>,
}

/// Result of looking an object up in a session's own changes.
pub(crate) enum Lookup {
    Found(ManagedObject),
    Deleted,
    Unknown,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty() && self.deleted.is_empty()
    }

    pub fn lookup(&self, id: &ObjectId) -> Lookup {
        if self.deleted_ids.contains(id) {
            Lookup::Deleted
        } else if let Some(object) = self.objects.get(id) {
            Lookup::Found(object.clone())
        } else {
            Lookup::Unknown
        }
    }

    pub fn is_deleted(&self, id: &ObjectId) -> bool {
        self.deleted_ids.contains(id)
    }

    /// Returns true if this session has its own version of the object.
    pub fn touches(&self, id: &ObjectId) -> bool {
        self.deleted_ids.contains(id) || self.objects.contains_key(id)
    }

    pub fn is_inserted(&self, id: &ObjectId) -> bool {
        matches!(self.status.get(id), Some(Change::Inserted))
    }

    /// Pending inserted and updated objects, current values.
    pub fn live_objects(&self) -> impl Iterator<Item = &ManagedObject> {
        self.order.iter().filter_map(|id| self.objects.get(id))
    }

    pub fn inserted(&self) -> Vec<ManagedObject> {
        self.order
            .iter()
            .filter(|id| self.is_inserted(id))
            .filter_map(|id| self.objects.get(id).cloned())
            .collect()
    }

    pub fn updated(&self) -> Vec<ManagedObject> {
        self.order
            .iter()
            .filter(|id| matches!(self.status.get(id), Some(Change::Updated(_))))
            .filter_map(|id| self.objects.get(id).cloned())
            .collect()
    }

    pub fn updated_ids(&self) -> Vec<ObjectId> {
        self.order
            .iter()
            .filter(|id| matches!(self.status.get(id), Some(Change::Updated(_))))
            .copied()
            .collect()
    }

    pub fn deleted(&self) -> &[ManagedObject] {
        &self.deleted
    }

    /// Changed keys of every pending update.
    pub fn changed_keys(&self) -> HashMap<ObjectId, BTreeSet<String>> {
        self.status
            .iter()
            .filter_map(|(id, change)| match change {
                Change::Updated(keys) => Some((*id, keys.clone())),
                Change::Inserted => None,
            })
            .collect()
    }

    pub fn record_insert(&mut self, object: ManagedObject) {
        let id = object.id;
        if self.status.insert(id, Change::Inserted).is_none() {
            self.order.push(id);
        }
        self.objects.insert(id, object);
    }

    /// Records an update. An update to a pending insert stays an insert.
    ///
    /// Returns false if the object is already deleted here.
    pub fn record_update(&mut self, object: ManagedObject, keys: BTreeSet<String>) -> bool {
        let id = object.id;
        if self.deleted_ids.contains(&id) {
            return false;
        }
        match self.status.get_mut(&id) {
            Some(Change::Inserted) => {}
            Some(Change::Updated(existing)) => existing.extend(keys),
            None => {
                self.status.insert(id, Change::Updated(keys));
                self.order.push(id);
            }
        }
        self.objects.insert(id, object);
        true
    }

    /// Forgets a pending insert or update.
    pub fn discard(&mut self, id: &ObjectId) {
        if self.status.remove(id).is_some() {
            self.order.retain(|other| other != id);
        }
        self.objects.remove(id);
    }

    /// Records a deletion. Deleting a pending insert cancels it.
    pub fn record_delete(&mut self, snapshot: ManagedObject) {
        let id = snapshot.id;
        let previous = self.status.remove(&id);
        self.objects.remove(&id);
        if previous.is_some() {
            self.order.retain(|other| *other != id);
        }
        if matches!(previous, Some(Change::Inserted)) {
            return;
        }
        if self.deleted_ids.insert(id) {
            self.deleted.push(snapshot);
        }
    }

    /// Folds a child's changes into these.
    ///
    /// Returns the ids of child updates that were dropped because the
    /// object is already deleted here.
    pub fn merge(&mut self, child: &PendingChanges) -> Vec<ObjectId> {
        let mut dropped = Vec::new();
        for id in &child.order {
            let (Some(object), Some(change)) = (child.objects.get(id), child.status.get(id)) else {
                continue;
            };
            match change {
                Change::Inserted => self.record_insert(object.clone()),
                Change::Updated(keys) => {
                    if !self.record_update(object.clone(), keys.clone()) {
                        dropped.push(*id);
                    }
                }
            }
        }
        for snapshot in &child.deleted {
            self.record_delete(snapshot.clone());
        }
        dropped
    }
}
