//! Canonical JSON hashing: recursively sort object keys before serializing
//! and hashing, so two JSON documents that differ only in key order (or
//! only in insignificant whitespace) hash identically.

use sha2::{Digest, Sha256};

/// Returns a copy of `value` with every object's keys sorted lexicographically,
/// recursively. Arrays keep their element order.
pub fn sort_json_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_json_keys(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sort_json_keys).collect())
        }
        other => other.clone(),
    }
}

/// Serializes `value` with sorted keys and no insignificant whitespace.
pub fn canonical_json_string(value: &serde_json::Value) -> String {
    serde_json::to_string(&sort_json_keys(value)).expect("serde_json::Value always serializes")
}

/// SHA-256 hex digest of the canonical JSON form of `value`. Used to detect
/// whether a resource's desired configuration changed between two drift
/// runs regardless of key ordering upstream.
pub fn content_hash(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json_string(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod canonical_test {
    use super::*;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn differing_values_hash_differently() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn nested_objects_are_sorted_recursively() {
        let value = serde_json::json!({"outer": {"z": 1, "a": 2}});
        let sorted = sort_json_keys(&value);
        let keys: Vec<&String> = sorted["outer"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["a", "z"]);
    }
}
