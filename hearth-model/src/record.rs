use crate::{ManagedObject, ModelError, ModelResult, Record};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Describes how a raw record maps onto an identity-bearing entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityParameters {
    /// Entity the records import into.
    pub entity: String,
    /// Property on the object that holds the identity value.
    pub model_identity_property: String,
    /// Key in the raw record holding the identity value. Defaults to the
    /// model property name.
    pub record_identity_property: Option<String>,
    /// Property on the object that holds the group identifier, if the
    /// entity is grouped.
    pub group_property: Option<String>,
}

impl IdentityParameters {
    pub fn new(entity: impl Into<String>, identity_property: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            model_identity_property: identity_property.into(),
            record_identity_property: None,
            group_property: None,
        }
    }

    pub fn with_record_identity_property(mut self, key: impl Into<String>) -> Self {
        self.record_identity_property = Some(key.into());
        self
    }

    pub fn with_group_property(mut self, property: impl Into<String>) -> Self {
        self.group_property = Some(property.into());
        self
    }

    /// Key to read the identity from in a raw record.
    pub fn record_identity_key(&self) -> &str {
        self.record_identity_property
            .as_deref()
            .unwrap_or(&self.model_identity_property)
    }
}

/// A typed value that maps one-to-one onto an entity.
///
/// Property mapping follows the type's serde representation, so
/// `#[serde(rename = "...")]` is how a field is pointed at a differently
/// named property.
pub trait ModelRecord: Serialize + DeserializeOwned {
    /// Entity this type maps onto. Also the observation kind for
    /// record-typed observers.
    const ENTITY: &'static str;

    /// Identity settings used when importing values of this type.
    fn identity_parameters() -> IdentityParameters;

    /// Converts the value to a raw record.
    fn to_record(&self) -> ModelResult<Record> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(ModelError::Validation {
                entity: Self::ENTITY.to_string(),
                message: format!("record serialized to a non-object: {other}"),
            }),
        }
    }

    /// Rebuilds a value from a stored object.
    fn from_object(object: &ManagedObject) -> ModelResult<Self> {
        Ok(serde_json::from_value(object.data.clone())?)
    }
}
