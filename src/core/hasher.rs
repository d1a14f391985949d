//! ST-003: BLAKE3 hashing of desired resource state.
//!
//! Hashes are taken over canonical JSON: object keys sorted at every level,
//! so declaration order in YAML never changes a hash.

use super::types::{AttributeMap, ResourceType};
use serde_json::Value;

/// Object keys sorted at every level, so equal documents serialize identically.
pub fn canonical(v: &Value) -> Value {
    match v {
        Value::Object(m) => {
            let mut entries: Vec<_> = m.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Canonical JSON text of an attribute map.
pub fn canonical_json(attrs: &AttributeMap) -> String {
    let object: serde_json::Map<String, Value> = attrs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    canonical(&Value::Object(object)).to_string()
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash of a resource's desired state: its type plus canonical attributes.
pub fn hash_desired(resource_type: ResourceType, attrs: &AttributeMap) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(resource_type.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_json(attrs).as_bytes());
    format!("blake3:{}", hasher.finalize().to_hex())
}
