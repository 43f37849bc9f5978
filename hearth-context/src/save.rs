//! Save propagation.
//!
//! A child session's save folds its pending changes into its parent's
//! in-memory state, on the parent's tier. Only the root session writes to
//! the store, and only a durable root commit feeds the observer registry.

use crate::changes::PendingChanges;
use crate::session::SessionState;
use crate::{DataStoreError, DataStoreResult, Session};
use hearth_model::ManagedObject;
use hearth_store::CommitBatch;
use hearth_types::{ObjectId, SessionId};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// The inserted, updated and deleted objects of one successful save.
///
/// Deleted objects are the last snapshot the saving session knew.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub session: SessionId,
    pub inserted: Vec<ManagedObject>,
    pub updated: Vec<ManagedObject>,
    pub deleted: Vec<ManagedObject>,
    /// Keys modified on each updated object.
    pub changed_keys: HashMap<ObjectId, BTreeSet<String>>,
}

impl ChangeEvent {
    fn from_changes(session: SessionId, changes: &PendingChanges) -> Self {
        Self {
            session,
            inserted: changes.inserted(),
            updated: changes.updated(),
            deleted: changes.deleted().to_vec(),
            changed_keys: changes.changed_keys(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// A session's state just before one step of a chained save changed it.
pub(crate) struct SavePoint {
    session: Session,
    state: SessionState,
}

impl SavePoint {
    fn capture(session: &Session) -> Self {
        Self {
            session: session.clone(),
            state: session.state().clone(),
        }
    }

    /// Puts the captured state back.
    pub(crate) fn restore(self) {
        debug!(session = %self.session.id(), "Restoring state after a failed save");
        *self.session.state() = self.state;
    }
}

impl Session {
    /// Saves this session one level up.
    ///
    /// A child pushes its changes into its parent, which must then be saved
    /// itself to make them durable. The root commits to the store in one
    /// transaction. Returns `None` when there was nothing to save.
    ///
    /// On failure the session keeps its pending changes.
    pub fn save(&self) -> DataStoreResult<Option<ChangeEvent>> {
        self.save_recording().map(|(event, _)| event)
    }

    /// Like [`save`](Session::save), also returning the states this step
    /// replaced (the parent's before the merge, then this session's) so a
    /// later failure up the chain can undo it.
    pub(crate) fn save_recording(&self) -> DataStoreResult<(Option<ChangeEvent>, Vec<SavePoint>)> {
        self.guard()?;
        if self.is_root() {
            self.discard_stale_updates()?;
        }
        let changes = self.state().changes.clone();
        if changes.is_empty() {
            debug!(session = %self.id(), "Nothing to save");
            return Ok((None, Vec::new()));
        }
        self.validate(&changes)?;
        let event = ChangeEvent::from_changes(self.id(), &changes);

        let mut points = Vec::new();
        match self.parent() {
            Some(parent) => {
                let target = parent.clone();
                let before = self
                    .dispatcher()
                    .run_and_wait(parent.tier(), move || target.absorb(&changes))??;
                points.push(before);
                points.push(SavePoint::capture(self));
            }
            None => self.commit(&changes)?,
        }
        self.state().changes = PendingChanges::default();

        info!(
            session = %self.id(),
            tier = %self.tier(),
            inserted = event.inserted.len(),
            updated = event.updated.len(),
            deleted = event.deleted.len(),
            durable = self.is_root(),
            "Session saved"
        );
        if self.is_root() {
            let shared = self.shared();
            shared.observers.publish(&event, &shared.dispatcher);
        }
        Ok((Some(event), points))
    }

    /// Drops pending updates to objects another save has already removed
    /// from the store. They can never commit.
    fn discard_stale_updates(&self) -> DataStoreResult<()> {
        let updated = self.state().changes.updated_ids();
        if updated.is_empty() {
            return Ok(());
        }
        let missing = self.shared().store.with_store(self.generation(), |store| {
            let mut missing = Vec::new();
            for id in updated {
                if store
                    .fetch_by_id(&id)
                    .map_err(DataStoreError::from_fetch)?
                    .is_none()
                {
                    missing.push(id);
                }
            }
            Ok(missing)
        })?;

        let mut state = self.state();
        for id in missing {
            warn!(session = %self.id(), %id, "Dropped update to an object no longer in the store");
            state.changes.discard(&id);
            state.cache.evict_object(&id);
        }
        Ok(())
    }

    fn validate(&self, changes: &PendingChanges) -> DataStoreResult<()> {
        let model = self.model();
        for object in changes.live_objects() {
            model
                .validate(object)
                .map_err(|e| DataStoreError::ValidationFailed(e.to_string()))?;
            if let Some(handler) = self.shared().handler(&object.entity) {
                handler.validate(object).map_err(|message| {
                    DataStoreError::ValidationFailed(format!(
                        "{} {}: {message}",
                        object.entity, object.id
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Folds a child's changes into this session. Runs on this session's
    /// tier.
    fn absorb(&self, child: &PendingChanges) -> DataStoreResult<SavePoint> {
        self.shared().store.check_generation(self.generation())?;
        let before = SavePoint::capture(self);
        let mut state = self.state();
        for id in state.changes.merge(child) {
            warn!(session = %self.id(), %id, "Dropped update to an object deleted here");
        }
        for snapshot in child.deleted() {
            state.cache.evict_object(&snapshot.id);
        }
        Ok(before)
    }

    fn commit(&self, changes: &PendingChanges) -> DataStoreResult<()> {
        let batch = CommitBatch {
            inserted: changes.inserted(),
            updated: changes.updated(),
            deleted: changes.deleted().iter().map(|o| o.id).collect(),
        };
        self.shared()
            .store
            .with_store(self.generation(), |store| {
                store.commit(&batch).map_err(DataStoreError::from_commit)
            })
    }
}
