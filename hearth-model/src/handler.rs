use crate::ManagedObject;

/// Optional per-entity hooks for checks the [`Model`](crate::Model) cannot
/// express on its own.
///
/// Most entities do not need one: type and required-property checks are
/// derived from the entity description. Implement this for cross-field
/// rules (e.g. "end date after start date") or to fill transient fields
/// after an object is loaded from the store.
pub trait ValidationHandler: Send + Sync {
    /// Validate an object before a save accepts it.
    /// Return `Err(message)` to reject the whole save.
    fn validate(&self, object: &ManagedObject) -> Result<(), String> {
        let _ = object;
        Ok(())
    }

    /// Called after an object is loaded from the store, before it is
    /// registered in a session.
    fn on_after_load(&self, object: &mut ManagedObject) {
        let _ = object;
    }
}
