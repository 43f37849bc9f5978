use crate::{ManagedObject, ModelError, ModelResult, Predicate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// The schema descriptor for one store.
///
/// A model lists the entities a store may hold and the named fetch
/// templates callers can run against it. Its [`fingerprint`](Model::fingerprint)
/// is recorded in the store file; opening a store with a model whose
/// fingerprint differs is a schema incompatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub entities: Vec<EntityDescription>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fetch_templates: BTreeMap<String, FetchTemplate>,
}

fn default_version() -> u32 {
    1
}

impl Model {
    /// Creates an empty model.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            entities: Vec::new(),
            fetch_templates: BTreeMap::new(),
        }
    }

    /// Adds an entity description.
    pub fn with_entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    /// Adds a named fetch template.
    pub fn with_template(mut self, name: impl Into<String>, template: FetchTemplate) -> Self {
        self.fetch_templates.insert(name.into(), template);
        self
    }

    /// Loads a model from a JSON model file.
    pub fn from_path(path: &Path) -> ModelResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parses a model from its JSON representation.
    pub fn from_json(json: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Looks up an entity description by name.
    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Like [`entity`](Model::entity) but fails for undeclared names.
    pub fn require_entity(&self, name: &str) -> ModelResult<&EntityDescription> {
        self.entity(name)
            .ok_or_else(|| ModelError::UnknownEntity(name.to_string()))
    }

    /// Looks up a fetch template by name.
    pub fn template(&self, name: &str) -> ModelResult<&FetchTemplate> {
        self.fetch_templates
            .get(name)
            .ok_or_else(|| ModelError::UnknownTemplate(name.to_string()))
    }

    /// Hex SHA-256 over the version and entity descriptions.
    ///
    /// Fetch templates do not affect the stored layout and are left out.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_le_bytes());
        // Vec-ordered fields serialize deterministically.
        let encoded = serde_json::to_vec(&self.entities).unwrap_or_default();
        hasher.update(&encoded);
        hex::encode(hasher.finalize())
    }

    /// Checks an object against its entity description.
    pub fn validate(&self, object: &ManagedObject) -> ModelResult<()> {
        let entity = self.require_entity(&object.entity)?;
        let Some(data) = object.data.as_object() else {
            return Err(ModelError::validation(&object.entity, "payload is not an object"));
        };

        for (key, value) in data {
            let property = entity.property(key).ok_or_else(|| {
                ModelError::validation(&object.entity, format!("undeclared property '{key}'"))
            })?;
            if !value.is_null() && !property.property_type.accepts(value) {
                return Err(ModelError::validation(
                    &object.entity,
                    format!("property '{key}' expects {:?}, got {value}", property.property_type),
                ));
            }
        }

        for property in &entity.properties {
            let present = data.get(&property.name).is_some_and(|v| !v.is_null());
            if !property.optional && !present {
                return Err(ModelError::validation(
                    &object.entity,
                    format!("missing required property '{}'", property.name),
                ));
            }
        }
        Ok(())
    }
}

/// Describes one entity: its properties and default identity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    pub properties: Vec<PropertyDescription>,
    /// Property that carries the external identity value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_property: Option<String>,
    /// Property that carries the group identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_property: Option<String>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            identity_property: None,
            group_property: None,
        }
    }

    pub fn with_property(mut self, property: PropertyDescription) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_identity(mut self, property: impl Into<String>) -> Self {
        self.identity_property = Some(property.into());
        self
    }

    pub fn with_group(mut self, property: impl Into<String>) -> Self {
        self.group_property = Some(property.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescription> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Initial payload for a freshly inserted object: every declared
    /// default, nothing else.
    pub fn initial_data(&self) -> Map<String, Value> {
        self.properties
            .iter()
            .filter_map(|p| p.default.clone().map(|d| (p.name.clone(), d)))
            .collect()
    }
}

/// A single declared property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescription {
    pub name: String,
    pub property_type: PropertyType,
    #[serde(default = "default_optional")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_optional() -> bool {
    true
}

impl PropertyDescription {
    fn simple(name: &str, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            optional: true,
            default: None,
        }
    }

    /// Shorthand for a string property.
    pub fn string(name: &str) -> Self {
        Self::simple(name, PropertyType::String)
    }

    /// Shorthand for an integer property.
    pub fn integer(name: &str) -> Self {
        Self::simple(name, PropertyType::Integer)
    }

    /// Shorthand for a floating-point property.
    pub fn double(name: &str) -> Self {
        Self::simple(name, PropertyType::Double)
    }

    /// Shorthand for a boolean property.
    pub fn boolean(name: &str) -> Self {
        Self::simple(name, PropertyType::Boolean)
    }

    /// Shorthand for a date property (milliseconds since the epoch).
    pub fn date(name: &str) -> Self {
        Self::simple(name, PropertyType::Date)
    }

    /// Shorthand for an untyped JSON property.
    pub fn json(name: &str) -> Self {
        Self::simple(name, PropertyType::Json)
    }

    /// Marks the property as required.
    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    /// Sets the value new objects start with.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Value type of a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    Json,
}

impl PropertyType {
    /// Returns true if a non-null JSON value fits this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer | Self::Date => value.is_i64() || value.is_u64(),
            Self::Double => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Json => true,
        }
    }
}

/// A named, parameterised fetch stored in the model.
///
/// String operands of the form `$NAME` in the predicate are replaced by the
/// caller's substitution values when the template is instantiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchTemplate {
    pub entity: String,
    pub predicate: Predicate,
}

impl FetchTemplate {
    pub fn new(entity: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            entity: entity.into(),
            predicate,
        }
    }

    /// Resolves every `$VARIABLE` in the predicate.
    pub fn instantiate(&self, substitutions: &Map<String, Value>) -> ModelResult<Predicate> {
        self.predicate.substitute(substitutions)
    }
}
