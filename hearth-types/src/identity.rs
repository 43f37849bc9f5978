//! Identity keys for find-or-create deduplication.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The (entity, identity value, group) triple that names one logical object.
///
/// The group partitions otherwise identical identity values into
/// independent namespaces: the same external id can appear in two unrelated
/// collections and still resolve to two different objects.
///
/// Identity values are kept in their string form so that a JSON string
/// `"7"` and a JSON number `7` resolve to the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub entity: String,
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl IdentityKey {
    /// Creates a key from already-normalised parts.
    pub fn new(
        entity: impl Into<String>,
        identity: impl Into<String>,
        group: Option<impl Into<String>>,
    ) -> Self {
        Self {
            entity: entity.into(),
            identity: identity.into(),
            group: group.map(Into::into),
        }
    }

    /// Builds a key from a raw JSON identity value.
    ///
    /// Returns `None` when the value cannot act as an identity (null,
    /// arrays and objects).
    pub fn from_value(entity: &str, identity: &Value, group: Option<&str>) -> Option<Self> {
        let identity = Self::normalize(identity)?;
        Some(Self {
            entity: entity.to_string(),
            identity,
            group: group.map(str::to_string),
        })
    }

    /// Normalises a JSON identity value to its key form.
    pub fn normalize(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Returns true if this key lives in the given group.
    pub fn in_group(&self, group: Option<&str>) -> bool {
        self.group.as_deref() == group
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}[{}]@{}", self.entity, self.identity, group),
            None => write!(f, "{}[{}]", self.entity, self.identity),
        }
    }
}
