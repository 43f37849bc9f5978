//! Find-or-create import pipeline.
//!
//! Records are processed in input order against one session:
//!
//! 1. Existing objects in scope are prefetched once and the session's
//!    identity cache is warmed with them.
//! 2. Each record resolves to an identity key. A match (in the cache, or
//!    earlier in the same batch) is updated in place; otherwise a new object
//!    is created and cached, and the post-create callback runs.
//! 3. With `delete_existing`, pre-existing objects in the group that the
//!    batch did not touch are deleted.
//!
//! Nothing is saved here. Callers save the session once the whole batch
//! succeeded, or drop it.

use crate::{DataStoreError, DataStoreResult, Session};
use hearth_model::{EntityDescription, IdentityParameters, ManagedObject, Predicate, Record};
use hearth_store::FetchRequest;
use hearth_types::{IdentityKey, ObjectId};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Called once per created object with the source record and its index.
pub type PostCreateFn =
    Box<dyn FnMut(&ManagedObject, &Record, usize, &Session) -> anyhow::Result<()> + Send>;

/// How an import treats objects already in the store.
pub struct ImportParameters {
    /// Match records against existing objects instead of always creating.
    pub find_existing: bool,
    /// Delete existing objects in the group that the batch does not name.
    pub delete_existing: bool,
    /// Group every record of the batch belongs to.
    pub group_identifier: Option<String>,
    pub post_create: Option<PostCreateFn>,
}

impl Default for ImportParameters {
    fn default() -> Self {
        Self {
            find_existing: true,
            delete_existing: false,
            group_identifier: None,
            post_create: None,
        }
    }
}

impl ImportParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_existing(mut self, find: bool) -> Self {
        self.find_existing = find;
        self
    }

    /// Replace the whole group with the batch.
    pub fn delete_existing(mut self, delete: bool) -> Self {
        self.delete_existing = delete;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group_identifier = Some(group.into());
        self
    }

    pub fn on_create<F>(mut self, post_create: F) -> Self
    where
        F: FnMut(&ManagedObject, &Record, usize, &Session) -> anyhow::Result<()> + Send + 'static,
    {
        self.post_create = Some(Box::new(post_create));
        self
    }
}

impl fmt::Debug for ImportParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportParameters")
            .field("find_existing", &self.find_existing)
            .field("delete_existing", &self.delete_existing)
            .field("group_identifier", &self.group_identifier)
            .field("post_create", &self.post_create.is_some())
            .finish()
    }
}

/// A record skipped because it named a different group than the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConflict {
    pub index: usize,
    pub key: IdentityKey,
    pub record_group: Option<String>,
}

impl ImportConflict {
    pub fn to_error(&self) -> DataStoreError {
        DataStoreError::IdentityConflict {
            key: self.key.clone(),
            message: format!(
                "record {} names group {:?}",
                self.index, self.record_group
            ),
        }
    }
}

/// Outcome of one import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// One object per processed record, in input order.
    pub objects: Vec<ManagedObject>,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Records without a usable identity value.
    pub skipped: usize,
    pub conflicts: Vec<ImportConflict>,
}

impl Session {
    /// Imports `records` into this session.
    pub fn import_records(
        &self,
        records: impl IntoIterator<Item = Record>,
        identity: &IdentityParameters,
        mut params: ImportParameters,
    ) -> DataStoreResult<ImportReport> {
        self.guard()?;
        let model = self.model().clone();
        let entity = model.require_entity(&identity.entity)?;
        let group = params.group_identifier.clone();
        let group = group.as_deref();
        let records: Vec<Record> = records.into_iter().collect();
        let record_key = identity.record_identity_key();
        let scope = group_scope(identity, group);

        let existing = if params.delete_existing {
            self.fetch(&FetchRequest::new(&identity.entity).with_predicate(scope))?
        } else if params.find_existing {
            let candidates: Vec<Value> = records
                .iter()
                .filter_map(|r| r.get(record_key))
                .flat_map(identity_candidates)
                .collect();
            if candidates.is_empty() {
                Vec::new()
            } else {
                let predicate = Predicate::and([
                    scope,
                    Predicate::in_set(identity.model_identity_property.as_str(), candidates),
                ]);
                self.fetch(&FetchRequest::new(&identity.entity).with_predicate(predicate))?
            }
        } else {
            Vec::new()
        };
        if params.find_existing {
            self.warm_cache(identity, group, &existing);
        }

        let mut report = ImportReport::default();
        let mut touched: HashMap<IdentityKey, ObjectId> = HashMap::new();
        let mut order = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            let Some(key) = record
                .get(record_key)
                .and_then(|v| IdentityKey::from_value(&identity.entity, v, group))
            else {
                debug!(index, entity = %identity.entity, "Skipping record without identity value");
                report.skipped += 1;
                continue;
            };
            if let Some(conflict) = group_conflict(identity, record, group, index, &key) {
                warn!(index, %key, record_group = ?conflict.record_group, "Skipping record from another group");
                report.conflicts.push(conflict);
                continue;
            }

            let values = mapped_values(entity, identity, record, group);
            let matched = match touched.get(&key) {
                Some(id) => Some(*id),
                None if params.find_existing => self.cached(&key)?.map(|o| o.id),
                None => None,
            };

            let id = match matched {
                Some(id) => {
                    self.set_values(&id, &values)?;
                    report.updated += 1;
                    id
                }
                None => {
                    let object = self.create(&identity.entity, values)?;
                    self.state().cache.put(key.clone(), object.id);
                    report.created += 1;
                    if let Some(post_create) = params.post_create.as_mut() {
                        post_create(&object, record, index, self).map_err(DataStoreError::from_work)?;
                    }
                    object.id
                }
            };
            touched.insert(key, id);
            order.push(id);
        }

        if params.delete_existing {
            let kept: HashSet<ObjectId> = touched.values().copied().collect();
            for object in existing.iter().filter(|o| !kept.contains(&o.id)) {
                if self.delete(&object.id)? {
                    report.deleted += 1;
                }
            }
        }

        for id in order {
            if let Some(object) = self.resolve(&id)? {
                report.objects.push(object);
            }
        }

        info!(
            session = %self.id(),
            entity = %identity.entity,
            group = ?group,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            conflicts = report.conflicts.len(),
            "Import finished"
        );
        Ok(report)
    }

    /// Caches existing objects by identity. The first object wins when
    /// several share a key.
    fn warm_cache(
        &self,
        identity: &IdentityParameters,
        group: Option<&str>,
        objects: &[ManagedObject],
    ) {
        let mut seen = HashSet::new();
        let mut state = self.state();
        for object in objects {
            let Some(key) = object
                .get(&identity.model_identity_property)
                .and_then(|v| IdentityKey::from_value(&identity.entity, v, group))
            else {
                continue;
            };
            if seen.insert(key.clone()) {
                state.cache.put(key, object.id);
            }
        }
    }
}

/// Predicate selecting the objects of one group.
pub(crate) fn group_scope(identity: &IdentityParameters, group: Option<&str>) -> Predicate {
    match &identity.group_property {
        Some(property) => Predicate::group(property, group),
        None => Predicate::True,
    }
}

/// Every stored form an identity value may take: the string form, plus
/// the number or boolean it spells.
pub(crate) fn identity_candidates(value: &Value) -> Vec<Value> {
    let Some(text) = IdentityKey::normalize(value) else {
        return Vec::new();
    };
    let mut candidates = vec![Value::String(text.clone())];
    if let Ok(n) = text.parse::<i64>() {
        candidates.push(n.into());
    } else if let Some(n) = text
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        candidates.push(Value::Number(n));
    }
    if let Ok(b) = text.parse::<bool>() {
        candidates.push(Value::Bool(b));
    }
    candidates
}

fn group_conflict(
    identity: &IdentityParameters,
    record: &Record,
    group: Option<&str>,
    index: usize,
    key: &IdentityKey,
) -> Option<ImportConflict> {
    let property = identity.group_property.as_deref()?;
    let value = record.get(property).filter(|v| !v.is_null())?;
    let record_group = IdentityKey::normalize(value);
    (record_group.as_deref() != group).then(|| ImportConflict {
        index,
        key: key.clone(),
        record_group,
    })
}

/// Record values the entity declares, with the record's identity key
/// mapped onto the model's identity property and the group stamped on.
fn mapped_values(
    entity: &EntityDescription,
    identity: &IdentityParameters,
    record: &Record,
    group: Option<&str>,
) -> Record {
    let record_key = identity.record_identity_key();
    let mut values = Record::new();
    for (key, value) in record {
        let target = if key == record_key {
            identity.model_identity_property.as_str()
        } else {
            key.as_str()
        };
        if entity.property(target).is_some() {
            values.insert(target.to_string(), value.clone());
        }
    }
    if let Some(property) = &identity.group_property
        && entity.property(property).is_some()
    {
        let group = group.map_or(Value::Null, |g| Value::String(g.to_string()));
        values.insert(property.clone(), group);
    }
    values
}
