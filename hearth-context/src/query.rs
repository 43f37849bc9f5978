//! Convenience queries and object operations on a session.

use crate::import::{group_scope, identity_candidates};
use crate::{DataStoreError, DataStoreResult, Session};
use hearth_model::{IdentityParameters, ManagedObject, Predicate, Record, SortDescriptor};
use hearth_store::FetchRequest;
use hearth_types::{IdentityKey, ObjectId};
use serde_json::{Map, Value};

impl Session {
    /// Identity settings declared on an entity.
    pub fn identity_parameters(&self, entity: &str) -> DataStoreResult<IdentityParameters> {
        let description = self.model().require_entity(entity)?;
        let property = description.identity_property.as_deref().ok_or_else(|| {
            DataStoreError::ValidationFailed(format!("{entity} declares no identity property"))
        })?;
        let mut identity = IdentityParameters::new(entity, property);
        identity.group_property = description.group_property.clone();
        Ok(identity)
    }

    fn entity_scope(&self, entity: &str, group: Option<&str>) -> DataStoreResult<Predicate> {
        let description = self.model().require_entity(entity)?;
        Ok(match &description.group_property {
            Some(property) => Predicate::group(property, group),
            None => Predicate::True,
        })
    }

    // ── Creation ─────────────────────────────────────────────────

    /// Inserts an object holding only the entity's defaults.
    pub fn create_and_insert(&self, entity: &str) -> DataStoreResult<ManagedObject> {
        self.create(entity, Record::new())
    }

    /// Inserts an object with an identity value (and group) and caches it.
    pub fn create_and_insert_with_identity(
        &self,
        entity: &str,
        identity_value: Value,
        group: Option<&str>,
    ) -> DataStoreResult<ManagedObject> {
        let identity = self.identity_parameters(entity)?;
        let key = identity_key(&identity, &identity_value, group)?;
        let object = self.create(entity, identity_values(&identity, identity_value, group))?;
        self.state().cache.put(key, object.id);
        Ok(object)
    }

    /// Returns the object with this identity, creating it if needed. The
    /// flag is true when the object was created.
    pub fn find_or_create(
        &self,
        identity: &IdentityParameters,
        identity_value: Value,
        group: Option<&str>,
    ) -> DataStoreResult<(ManagedObject, bool)> {
        self.guard()?;
        let key = identity_key(identity, &identity_value, group)?;
        if let Some(object) = self.cached(&key)? {
            return Ok((object, false));
        }

        let predicate = Predicate::and([
            group_scope(identity, group),
            Predicate::in_set(
                identity.model_identity_property.as_str(),
                identity_candidates(&identity_value),
            ),
        ]);
        let found = self
            .fetch_single(&FetchRequest::new(&identity.entity).with_predicate(predicate))?;
        let (object, created) = match found {
            Some(object) => (object, false),
            None => {
                let values = identity_values(identity, identity_value, group);
                (self.create(&identity.entity, values)?, true)
            }
        };
        self.state().cache.put(key, object.id);
        Ok((object, created))
    }

    // ── Deletion ─────────────────────────────────────────────────

    /// Deletes objects by id. Returns how many were visible and deleted.
    pub fn delete_objects(&self, ids: &[ObjectId]) -> DataStoreResult<usize> {
        let mut deleted = 0;
        for id in ids {
            if self.delete(id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Deletes every object of an entity in a group.
    pub fn delete_objects_with_entity(
        &self,
        entity: &str,
        group: Option<&str>,
    ) -> DataStoreResult<usize> {
        let ids: Vec<_> = self
            .objects_for_entity(entity, group)?
            .into_iter()
            .map(|o| o.id)
            .collect();
        self.delete_objects(&ids)
    }

    /// Deletes the objects carrying any of the given identity values.
    pub fn delete_objects_with_identity(
        &self,
        identity: &IdentityParameters,
        values: &[Value],
        group: Option<&str>,
    ) -> DataStoreResult<usize> {
        let candidates: Vec<Value> = values.iter().flat_map(identity_candidates).collect();
        let predicate = Predicate::and([
            group_scope(identity, group),
            Predicate::in_set(identity.model_identity_property.as_str(), candidates),
        ]);
        let ids: Vec<_> = self
            .fetch(&FetchRequest::new(&identity.entity).with_predicate(predicate))?
            .into_iter()
            .map(|o| o.id)
            .collect();
        self.delete_objects(&ids)
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Every object of an entity in a group. Entities without a group
    /// property ignore `group`.
    pub fn objects_for_entity(
        &self,
        entity: &str,
        group: Option<&str>,
    ) -> DataStoreResult<Vec<ManagedObject>> {
        let predicate = self.entity_scope(entity, group)?;
        self.fetch(&FetchRequest::new(entity).with_predicate(predicate))
    }

    /// Objects of an entity in a group whose `key` is one of `values`.
    pub fn objects_for_entity_matching(
        &self,
        entity: &str,
        group: Option<&str>,
        key: &str,
        values: Vec<Value>,
    ) -> DataStoreResult<Vec<ManagedObject>> {
        let predicate = Predicate::and([
            self.entity_scope(entity, group)?,
            Predicate::in_set(key, values),
        ]);
        self.fetch(&FetchRequest::new(entity).with_predicate(predicate))
    }

    /// Objects whose `properties[i]` equals `values[i]` for every `i`.
    pub fn perform_fetch(
        &self,
        entity: &str,
        properties: &[&str],
        values: &[Value],
        sort: Vec<SortDescriptor>,
    ) -> DataStoreResult<Vec<ManagedObject>> {
        self.fetch(&equality_request(entity, properties, values, sort)?)
    }

    pub fn perform_single_result_fetch(
        &self,
        entity: &str,
        properties: &[&str],
        values: &[Value],
    ) -> DataStoreResult<Option<ManagedObject>> {
        self.fetch_single(&equality_request(entity, properties, values, Vec::new())?)
    }

    /// Runs a named fetch template from the model.
    pub fn perform_fetch_with_template(
        &self,
        template: &str,
        substitutions: &Map<String, Value>,
        sort: Vec<SortDescriptor>,
    ) -> DataStoreResult<Vec<ManagedObject>> {
        let request = self.template_request(template, substitutions)?.with_sort(sort);
        self.fetch(&request)
    }

    pub fn perform_single_result_fetch_with_template(
        &self,
        template: &str,
        substitutions: &Map<String, Value>,
    ) -> DataStoreResult<Option<ManagedObject>> {
        self.fetch_single(&self.template_request(template, substitutions)?)
    }

    fn template_request(
        &self,
        template: &str,
        substitutions: &Map<String, Value>,
    ) -> DataStoreResult<FetchRequest> {
        let template = self.model().template(template)?;
        let predicate = template.instantiate(substitutions)?;
        Ok(FetchRequest::new(&template.entity).with_predicate(predicate))
    }
}

fn identity_key(
    identity: &IdentityParameters,
    value: &Value,
    group: Option<&str>,
) -> DataStoreResult<IdentityKey> {
    IdentityKey::from_value(&identity.entity, value, group).ok_or_else(|| {
        DataStoreError::ValidationFailed(format!(
            "{value} cannot identify a {} object",
            identity.entity
        ))
    })
}

fn identity_values(identity: &IdentityParameters, value: Value, group: Option<&str>) -> Record {
    let mut values = Record::new();
    values.insert(identity.model_identity_property.clone(), value);
    if let Some(property) = &identity.group_property {
        values.insert(
            property.clone(),
            group.map_or(Value::Null, |g| Value::String(g.to_string())),
        );
    }
    values
}

fn equality_request(
    entity: &str,
    properties: &[&str],
    values: &[Value],
    sort: Vec<SortDescriptor>,
) -> DataStoreResult<FetchRequest> {
    if properties.len() != values.len() {
        return Err(DataStoreError::FetchFailed(format!(
            "{} properties but {} values",
            properties.len(),
            values.len()
        )));
    }
    let predicate = Predicate::and(
        properties
            .iter()
            .zip(values)
            .map(|(property, value)| Predicate::eq(*property, value.clone())),
    );
    Ok(FetchRequest::new(entity).with_predicate(predicate).with_sort(sort))
}
