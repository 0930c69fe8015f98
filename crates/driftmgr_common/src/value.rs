//! A dynamic value tree for heterogeneous Terraform resource attributes.
//!
//! Terraform instance attributes are an untyped bag of JSON-ish data. Rather
//! than passing `serde_json::Value` around (and leaking a JSON-specific type
//! into every signature), DriftMgr models attributes as its own small tagged
//! tree. It (de)serializes exactly like plain JSON via `#[serde(untagged)]`,
//! so state files round-trip byte-for-byte.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single Terraform attribute value, or an attribute subtree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for the "zero value" of each variant: `null`, `false`, `0`, `""`,
    /// an empty list, or an empty map. The Drift Engine ignores fields whose
    /// values are zero-valued on both sides of a comparison.
    pub fn is_zero_value(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !*b,
            Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Map(map) => map.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Recursively visits every string leaf in this value, depth-first.
    pub fn visit_strings<'a, F: FnMut(&'a str)>(&'a self, f: &mut F) {
        match self {
            Value::String(s) => f(s),
            Value::List(items) => {
                for item in items {
                    item.visit_strings(f);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.visit_strings(f);
                }
            }
            _ => {}
        }
    }

    /// Renders this value as a display string, replacing any leaf whose
    /// dotted path is present in `sensitive` with a redaction marker.
    /// Sensitive-field masking applies only at the leaf level per the
    /// dynamic-value design: a sensitive map or list is still traversed,
    /// only its sensitive leaves are masked.
    pub fn masked_display(&self, sensitive: &[String]) -> String {
        let sensitive: std::collections::HashSet<&str> =
            sensitive.iter().map(|s| s.as_str()).collect();
        let mut out = String::new();
        self.write_masked(&mut out, "", &sensitive);
        out
    }

    fn write_masked(&self, out: &mut String, path: &str, sensitive: &std::collections::HashSet<&str>) {
        if sensitive.contains(path) {
            out.push_str("(sensitive value)");
            return;
        }
        match self {
            Value::Map(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let child_path = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                    out.push_str(k);
                    out.push(':');
                    v.write_masked(out, &child_path, sensitive);
                }
                out.push('}');
            }
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let child_path = format!("{path}[{i}]");
                    item.write_masked(out, &child_path, sensitive);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Value::Number(n),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

/// An ordered attribute map, the shape of `Instance::attributes`.
pub type AttributeMap = IndexMap<String, Value>;

/// A stable, key-sorted view of an attribute map, used wherever a
/// deterministic iteration order matters more than insertion order (hashing,
/// diffing).
pub fn sorted(map: &AttributeMap) -> BTreeMap<&str, &Value> {
    map.iter().map(|(k, v)| (k.as_str(), v)).collect()
}

#[cfg(test)]
mod value_test {
    use super::*;

    #[test]
    fn zero_value_detection() {
        assert!(Value::Null.is_zero_value());
        assert!(Value::Bool(false).is_zero_value());
        assert!(!Value::Bool(true).is_zero_value());
        assert!(Value::String(String::new()).is_zero_value());
        assert!(!Value::String("x".into()).is_zero_value());
        assert!(Value::List(vec![]).is_zero_value());
    }

    #[test]
    fn masks_only_sensitive_leaves() {
        let mut map = IndexMap::new();
        map.insert("name".to_string(), Value::String("web".to_string()));
        map.insert("password".to_string(), Value::String("hunter2".to_string()));
        let value = Value::Map(map);
        let rendered = value.masked_display(&["password".to_string()]);
        assert!(rendered.contains("web"));
        assert!(rendered.contains("(sensitive value)"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn round_trips_through_json() {
        let json: serde_json::Value = serde_json::json!({
            "id": "i-123",
            "tags": {"Name": "web"},
            "count": 2,
            "aliases": ["a", "b"],
        });
        let value: Value = json.clone().into();
        let back: serde_json::Value = value.into();
        assert_eq!(json, back);
    }
}
