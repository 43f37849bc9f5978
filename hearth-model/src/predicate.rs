//! In-process predicates and sort descriptors.
//!
//! The store engine evaluates these after loading an entity's rows, and the
//! change-notification registry evaluates them against committed snapshots.

use crate::{ManagedObject, ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Binary comparison applied to a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// String containment.
    Contains,
    /// String prefix.
    BeginsWith,
}

/// A filter over an object's top-level properties.
///
/// Missing properties compare as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    True,
    Compare {
        key: String,
        comparison: Comparison,
        value: Value,
    },
    In {
        key: String,
        values: Vec<Value>,
    },
    IsNull {
        key: String,
    },
    And {
        predicates: Vec<Predicate>,
    },
    Or {
        predicates: Vec<Predicate>,
    },
    Not {
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    pub fn compare(key: impl Into<String>, comparison: Comparison, value: impl Into<Value>) -> Self {
        Self::Compare {
            key: key.into(),
            comparison,
            value: value.into(),
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparison::Eq, value)
    }

    pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, Comparison::Ne, value)
    }

    pub fn in_set(key: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::In {
            key: key.into(),
            values: values.into_iter().collect(),
        }
    }

    pub fn is_null(key: impl Into<String>) -> Self {
        Self::IsNull { key: key.into() }
    }

    /// Conjunction; an empty list is `True`.
    pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let predicates: Vec<_> = predicates
            .into_iter()
            .filter(|p| !matches!(p, Predicate::True))
            .collect();
        match predicates.len() {
            0 => Self::True,
            1 => predicates.into_iter().next().unwrap_or(Self::True),
            _ => Self::And { predicates },
        }
    }

    pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Or {
            predicates: predicates.into_iter().collect(),
        }
    }

    pub fn negate(predicate: Predicate) -> Self {
        Self::Not {
            predicate: Box::new(predicate),
        }
    }

    /// Equality against an optional group property.
    ///
    /// With no group identifier the group property must be unset.
    pub fn group(property: &str, identifier: Option<&str>) -> Self {
        match identifier {
            Some(id) => Self::eq(property, id),
            None => Self::is_null(property),
        }
    }

    /// Evaluates the predicate against an object.
    pub fn evaluate(&self, object: &ManagedObject) -> bool {
        self.evaluate_data(&object.data)
    }

    /// Evaluates the predicate against a raw property payload.
    pub fn evaluate_data(&self, data: &Value) -> bool {
        match self {
            Self::True => true,
            Self::Compare {
                key,
                comparison,
                value,
            } => compare(field(data, key), *comparison, value),
            Self::In { key, values } => {
                let actual = field(data, key);
                values.iter().any(|v| values_equal(actual, v))
            }
            Self::IsNull { key } => field(data, key).is_null(),
            Self::And { predicates } => predicates.iter().all(|p| p.evaluate_data(data)),
            Self::Or { predicates } => predicates.iter().any(|p| p.evaluate_data(data)),
            Self::Not { predicate } => !predicate.evaluate_data(data),
        }
    }

    /// Replaces every `$NAME` string operand with `substitutions[NAME]`.
    pub fn substitute(&self, substitutions: &Map<String, Value>) -> ModelResult<Predicate> {
        let resolve = |value: &Value| -> ModelResult<Value> {
            match value.as_str().and_then(|s| s.strip_prefix('$')) {
                Some(name) => substitutions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ModelError::MissingVariable(name.to_string())),
                None => Ok(value.clone()),
            }
        };

        Ok(match self {
            Self::True => Self::True,
            Self::Compare {
                key,
                comparison,
                value,
            } => Self::Compare {
                key: key.clone(),
                comparison: *comparison,
                value: resolve(value)?,
            },
            Self::In { key, values } => {
                let mut resolved = Vec::with_capacity(values.len());
                for v in values {
                    match resolve(v)? {
                        // A variable bound to an array expands in place.
                        Value::Array(items) => resolved.extend(items),
                        other => resolved.push(other),
                    }
                }
                Self::In {
                    key: key.clone(),
                    values: resolved,
                }
            }
            Self::IsNull { key } => Self::IsNull { key: key.clone() },
            Self::And { predicates } => Self::And {
                predicates: predicates
                    .iter()
                    .map(|p| p.substitute(substitutions))
                    .collect::<ModelResult<_>>()?,
            },
            Self::Or { predicates } => Self::Or {
                predicates: predicates
                    .iter()
                    .map(|p| p.substitute(substitutions))
                    .collect::<ModelResult<_>>()?,
            },
            Self::Not { predicate } => Self::Not {
                predicate: Box::new(predicate.substitute(substitutions)?),
            },
        })
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Self::True
    }
}

static NULL: Value = Value::Null;

fn field<'a>(data: &'a Value, key: &str) -> &'a Value {
    data.get(key).unwrap_or(&NULL)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(actual: &Value, comparison: Comparison, expected: &Value) -> bool {
    match comparison {
        Comparison::Eq => values_equal(actual, expected),
        Comparison::Ne => !values_equal(actual, expected),
        Comparison::Lt => ordered(actual, expected) == Some(Ordering::Less),
        Comparison::Le => matches!(ordered(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        Comparison::Gt => ordered(actual, expected) == Some(Ordering::Greater),
        Comparison::Ge => {
            matches!(ordered(actual, expected), Some(Ordering::Greater | Ordering::Equal))
        }
        Comparison::Contains => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(e)) => a.contains(e),
            _ => false,
        },
        Comparison::BeginsWith => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(e)) => a.starts_with(e),
            _ => false,
        },
    }
}

/// Ordering between two values of the same kind; `None` across kinds.
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used for sorting.
///
/// Values of different kinds order by kind (null first); arrays and
/// objects compare equal to each other.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    kind_rank(a)
        .cmp(&kind_rank(b))
        .then_with(|| ordered(a, b).unwrap_or(Ordering::Equal))
}

/// One key of a fetch's sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn ascending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn descending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }

    /// Compares two objects by a list of sort descriptors.
    ///
    /// Ties fall back to creation time and then id so sorting is
    /// deterministic.
    pub fn compare_objects(
        descriptors: &[SortDescriptor],
        a: &ManagedObject,
        b: &ManagedObject,
    ) -> Ordering {
        for d in descriptors {
            let ord = compare_values(field(&a.data, &d.key), field(&b.data, &d.key));
            let ord = if d.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}
