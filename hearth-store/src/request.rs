use hearth_model::{ManagedObject, Predicate, SortDescriptor};
use hearth_types::ObjectId;

/// A fetch against one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub entity: String,
    pub predicate: Predicate,
    pub sort: Vec<SortDescriptor>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    /// Fetches every object of `entity`, in creation order.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::True,
            sort: Vec::new(),
            limit: None,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortDescriptor>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the object belongs in this request's result set.
    pub fn matches(&self, object: &ManagedObject) -> bool {
        object.entity == self.entity && self.predicate.evaluate(object)
    }

    /// Sorts and truncates an already-filtered result set.
    pub fn finish(&self, mut objects: Vec<ManagedObject>) -> Vec<ManagedObject> {
        objects.sort_by(|a, b| SortDescriptor::compare_objects(&self.sort, a, b));
        if let Some(limit) = self.limit {
            objects.truncate(limit);
        }
        objects
    }
}

/// The changes one root-level save writes to disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitBatch {
    pub inserted: Vec<ManagedObject>,
    pub updated: Vec<ManagedObject>,
    pub deleted: Vec<ObjectId>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}
