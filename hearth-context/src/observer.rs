//! Change-notification registry.
//!
//! Observers register a watcher, an entity filter, an optional predicate,
//! an optional set of keys that must have changed, and the tier to be called
//! on. Every durable commit is filtered per observer and each non-empty
//! result is delivered asynchronously on that observer's tier, in
//! registration order.

use crate::dispatch::{Dispatcher, panic_message};
use crate::ChangeEvent;
use hearth_model::{ManagedObject, ModelRecord, ModelResult, Predicate};
use hearth_types::{DispatchTier, ObjectId, WatcherId};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The filtered view of one commit handed to an observer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeNotification {
    pub inserted: Vec<ManagedObject>,
    pub updated: Vec<ManagedObject>,
    pub deleted: Vec<ManagedObject>,
}

impl ChangeNotification {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of objects across the three sets.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    pub fn inserted_ids(&self) -> Vec<ObjectId> {
        self.inserted.iter().map(|o| o.id).collect()
    }

    pub fn updated_ids(&self) -> Vec<ObjectId> {
        self.updated.iter().map(|o| o.id).collect()
    }

    pub fn deleted_ids(&self) -> Vec<ObjectId> {
        self.deleted.iter().map(|o| o.id).collect()
    }

    pub fn inserted_records<R: ModelRecord>(&self) -> ModelResult<Vec<R>> {
        self.inserted.iter().map(R::from_object).collect()
    }

    pub fn updated_records<R: ModelRecord>(&self) -> ModelResult<Vec<R>> {
        self.updated.iter().map(R::from_object).collect()
    }

    pub fn deleted_records<R: ModelRecord>(&self) -> ModelResult<Vec<R>> {
        self.deleted.iter().map(R::from_object).collect()
    }
}

/// What an observer wants to hear about.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOptions {
    pub entity: String,
    pub predicate: Option<Predicate>,
    /// Updates are delivered only if one of these keys changed.
    pub changed_keys: Option<BTreeSet<String>>,
    pub tier: DispatchTier,
}

impl ObserverOptions {
    /// Observes every change to `entity`, delivered on the main tier.
    pub fn for_entity(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            changed_keys: None,
            tier: DispatchTier::Main,
        }
    }

    /// Observes every change to a record type's entity.
    pub fn for_record<R: ModelRecord>() -> Self {
        Self::for_entity(R::ENTITY)
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_changed_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn on_tier(mut self, tier: DispatchTier) -> Self {
        self.tier = tier;
        self
    }

    fn filter(&self, event: &ChangeEvent) -> ChangeNotification {
        let matches = |object: &&ManagedObject| {
            object.entity == self.entity
                && self.predicate.as_ref().is_none_or(|p| p.evaluate(object))
        };
        let key_changed = |object: &&ManagedObject| match &self.changed_keys {
            None => true,
            Some(wanted) => event
                .changed_keys
                .get(&object.id)
                .is_some_and(|changed| !changed.is_disjoint(wanted)),
        };

        ChangeNotification {
            inserted: event.inserted.iter().filter(matches).cloned().collect(),
            updated: event
                .updated
                .iter()
                .filter(matches)
                .filter(key_changed)
                .cloned()
                .collect(),
            deleted: event.deleted.iter().filter(matches).cloned().collect(),
        }
    }
}

type Action = Arc<dyn Fn(&ChangeNotification) -> bool + Send + Sync>;
type Liveness = Box<dyn Fn() -> bool + Send + Sync>;

struct ObserverEntry {
    watcher: WatcherId,
    options: ObserverOptions,
    /// Returns false once the watcher is gone.
    action: Action,
    alive: Liveness,
}

/// Registration table of change observers.
#[derive(Default)]
pub struct ObserverRegistry {
    entries: Mutex<Vec<ObserverEntry>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action` for `watcher`.
    ///
    /// Only a weak reference to the watcher is kept. Registering the same
    /// watcher for the same entity again replaces the earlier entry in
    /// place.
    pub fn add<W, F>(&self, watcher: &Arc<W>, options: ObserverOptions, action: F)
    where
        W: Send + Sync + 'static,
        F: Fn(&W, &ChangeNotification) + Send + Sync + 'static,
    {
        let id = WatcherId::of(watcher);
        let weak = Arc::downgrade(watcher);
        let liveness = weak.clone();
        let entry = ObserverEntry {
            watcher: id,
            options,
            action: Arc::new(move |notification| match weak.upgrade() {
                Some(watcher) => {
                    action(&watcher, notification);
                    true
                }
                None => false,
            }),
            alive: Box::new(move || liveness.strong_count() > 0),
        };

        let mut entries = self.entries.lock();
        prune(&mut entries);
        match entries
            .iter_mut()
            .find(|e| e.watcher == id && e.options.entity == entry.options.entity)
        {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        debug!(watcher = %id, "Observer registered");
    }

    /// Removes the watcher's observers, optionally only those for one
    /// entity. Returns true if anything was removed.
    pub fn remove<W: ?Sized>(&self, watcher: &Arc<W>, entity: Option<&str>) -> bool {
        let id = WatcherId::of(watcher);
        let mut entries = self.entries.lock();
        prune(&mut entries);
        let before = entries.len();
        entries.retain(|e| !(e.watcher == id && entity.is_none_or(|name| e.options.entity == name)));
        before != entries.len()
    }

    /// Returns true if the watcher has an observer, optionally for one
    /// entity.
    pub fn contains<W: ?Sized>(&self, watcher: &Arc<W>, entity: Option<&str>) -> bool {
        let id = WatcherId::of(watcher);
        let mut entries = self.entries.lock();
        prune(&mut entries);
        entries
            .iter()
            .any(|e| e.watcher == id && entity.is_none_or(|name| e.options.entity == name))
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        prune(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fans a committed change out to every interested observer.
    pub(crate) fn publish(&self, event: &ChangeEvent, dispatcher: &Dispatcher) {
        let mut deliveries: Vec<_> = {
            let mut entries = self.entries.lock();
            prune(&mut entries);
            entries
                .iter()
                .filter_map(|entry| {
                    let notification = entry.options.filter(event);
                    (!notification.is_empty()).then(|| {
                        (
                            entry.watcher,
                            entry.options.tier,
                            entry.action.clone(),
                            notification,
                        )
                    })
                })
                .collect()
        };

        // One job per tier, so observers of one event run in registration
        // order even on the worker pool.
        for tier in DispatchTier::ALL {
            let (batch, rest): (Vec<_>, Vec<_>) =
                deliveries.into_iter().partition(|(_, on, _, _)| *on == tier);
            deliveries = rest;
            if batch.is_empty() {
                continue;
            }
            let observers = batch.len();
            let job = Box::new(move || {
                for (watcher, _, action, notification) in &batch {
                    deliver(*watcher, action, notification);
                }
            });
            if let Err(e) = dispatcher.submit(tier, job) {
                warn!(%tier, observers, "Could not deliver change notifications: {}", e);
            }
        }
    }
}

fn deliver(watcher: WatcherId, action: &Action, notification: &ChangeNotification) {
    match catch_unwind(AssertUnwindSafe(|| action(notification))) {
        Ok(true) => {}
        Ok(false) => debug!(%watcher, "Watcher is gone, notification dropped"),
        Err(payload) => error!(
            %watcher,
            panic = %panic_message(&payload),
            "Observer action panicked"
        ),
    }
}

fn prune(entries: &mut Vec<ObserverEntry>) {
    let before = entries.len();
    entries.retain(|e| (e.alive)());
    let pruned = before - entries.len();
    if pruned > 0 {
        debug!(pruned, "Pruned observers of dropped watchers");
    }
}
