use hearth_types::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// A raw key→value record, as consumed by the import pipeline.
pub type Record = Map<String, Value>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// An object managed by a Hearth session.
///
/// The `data` field always holds a JSON object whose keys are the
/// properties declared for `entity` in the [`Model`](crate::Model).
/// Objects handed out by sessions are value snapshots: mutating one does
/// nothing until it is written back through the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub id: ObjectId,
    pub entity: String,
    pub data: Value,
    pub created_at: i64,
    pub modified_at: i64,
}

impl ManagedObject {
    /// Creates an empty object of the given entity with a fresh id.
    pub fn new(entity: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: ObjectId::new(),
            entity: entity.into(),
            data: Value::Object(Map::new()),
            created_at: now,
            modified_at: now,
        }
    }

    /// Creates an object with initial property values.
    pub fn with_data(entity: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            data: Value::Object(data),
            ..Self::new(entity)
        }
    }

    /// Returns the value of a top-level property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Sets a top-level property. Returns true if the stored value changed.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        if !self.data.is_object() {
            self.data = Value::Object(Map::new());
        }
        let Some(map) = self.data.as_object_mut() else {
            return false;
        };
        if map.get(key) == Some(&value) {
            return false;
        }
        map.insert(key.to_string(), value);
        true
    }

    /// Returns the property map, if the payload is an object.
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.data.as_object()
    }

    /// Extract a string value from `data` using a JSON pointer (e.g., "/name").
    pub fn get_str(&self, pointer: &str) -> Option<&str> {
        self.data.pointer(pointer).and_then(|v| v.as_str())
    }

    /// Extract a boolean value from `data` using a JSON pointer.
    pub fn get_bool(&self, pointer: &str) -> Option<bool> {
        self.data.pointer(pointer).and_then(|v| v.as_bool())
    }

    /// Extract a numeric value from `data` using a JSON pointer.
    pub fn get_number(&self, pointer: &str) -> Option<f64> {
        self.data.pointer(pointer).and_then(|v| v.as_f64())
    }
}
