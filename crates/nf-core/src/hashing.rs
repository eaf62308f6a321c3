//! Order-independent hashing of JSON values
//!
//! Used for selection memoization keys and schema fingerprints. Object keys
//! are sorted and array members are sorted by their canonical encoding, so two
//! values that differ only in field or member order hash identically.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Canonical string form of a JSON value
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonicalize(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", body)
        }
        Value::Array(items) => {
            let mut members: Vec<String> = items.iter().map(canonicalize).collect();
            members.sort();
            format!("[{}]", members.join(","))
        }
        other => other.to_string(),
    }
}

/// SHA-256 (hex) of the canonical form of a JSON value
pub fn stable_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serialize then hash
pub fn stable_hash_of<T: Serialize>(value: &T) -> Result<String> {
    Ok(stable_hash(&serde_json::to_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"query": "slack", "category": "Communication", "maxTools": 5});
        let b = json!({"maxTools": 5, "category": "Communication", "query": "slack"});
        assert_eq!(stable_hash(&a), stable_hash(&b));
    }

    #[test]
    fn test_array_order_does_not_matter() {
        let a = json!({"previousTools": ["b", "a", "c"]});
        let b = json!({"previousTools": ["c", "b", "a"]});
        assert_eq!(stable_hash(&a), stable_hash(&b));
    }

    #[test]
    fn test_different_values_differ() {
        let a = json!({"query": "slack"});
        let b = json!({"query": "discord"});
        assert_ne!(stable_hash(&a), stable_hash(&b));
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let a = json!({"outer": {"y": [2, 1], "x": null}});
        assert_eq!(canonicalize(&a), r#"{"outer":{"x":null,"y":[1,2]}}"#);
    }
}
