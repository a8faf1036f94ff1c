//! Recursive dynamic value used for incident payloads, rule operands, and
//! decision context. Every PHI-scrubbing, condition-evaluation, and
//! canonical-serialization pass is a visitor over this type rather than a
//! scattering of raw `serde_json::Value` across business logic.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A primitive, list, or map value of unspecified shape.
///
/// `Map` uses a `BTreeMap` (not `HashMap`) so that iteration order is
/// deterministic by construction — canonical serialization depends on this.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Looks up a dotted field path (`"raw_data.drift_detected"`-style),
    /// returning `None` if any segment is missing or the path traverses a
    /// non-map value.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            if segment.is_empty() {
                continue;
            }
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Applies `f` to every string leaf in the tree, rebuilding the
    /// structure with the transformed strings in place. Non-string leaves
    /// pass through unchanged. Map key ordering is preserved (`BTreeMap`
    /// orders keys lexically regardless of insertion order).
    pub fn map_strings(&self, f: &mut impl FnMut(&str) -> String) -> Value {
        match self {
            Value::String(s) => Value::String(f(s)),
            Value::List(items) => Value::List(items.iter().map(|v| v.map_strings(f)).collect()),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.map_strings(f)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Visits every string leaf without rebuilding the tree; used by
    /// IP-preservation verification and other read-only scans.
    pub fn visit_strings(&self, f: &mut impl FnMut(&str)) {
        match self {
            Value::String(s) => f(s),
            Value::List(items) => items.iter().for_each(|v| v.visit_strings(f)),
            Value::Map(map) => map.values().for_each(|v| v.visit_strings(f)),
            _ => {}
        }
    }

    /// Deep equality used by the `eq`/`ne` rule-condition operators.
    pub fn deep_eq(&self, other: &Value) -> bool {
        self == other
    }

    /// Numeric comparison used by the `gt`/`lt` operators. Returns `None`
    /// when either side is not numeric, which callers treat as "false".
    pub fn partial_cmp_numeric(&self, other: &Value) -> Option<Ordering> {
        self.as_f64()?.partial_cmp(&other.as_f64()?)
    }

    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_path_traverses_nested_maps() {
        let mut inner = BTreeMap::new();
        inner.insert("drift_detected".to_string(), Value::Bool(true));
        let mut outer = BTreeMap::new();
        outer.insert("raw_data".to_string(), Value::Map(inner));
        let v = Value::Map(outer);

        assert_eq!(
            v.get_path("raw_data.drift_detected"),
            Some(&Value::Bool(true))
        );
        assert_eq!(v.get_path("raw_data.missing"), None);
        assert_eq!(v.get_path("missing.path"), None);
    }

    #[test]
    fn map_strings_preserves_shape() {
        let v = Value::List(vec![Value::from("a"), Value::Number(1.0), Value::from("b")]);
        let out = v.map_strings(&mut |s| s.to_uppercase());
        assert_eq!(
            out,
            Value::List(vec![Value::from("A"), Value::Number(1.0), Value::from("B")])
        );
    }

    #[test]
    fn json_roundtrip_preserves_values() {
        let original = serde_json::json!({
            "a": 1,
            "b": [true, null, "x"],
            "c": {"d": 2.5}
        });
        let v = Value::from_json(original.clone());
        assert_eq!(v.to_json(), original);
    }
}
