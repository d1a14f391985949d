//! Attribute map accessors and expand/flatten helpers shared by adapters.

use crate::core::types::AttributeMap;
use crate::error::ProviderError;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

pub fn get_str<'a>(attrs: &'a AttributeMap, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(Value::as_str)
}

pub fn require_str<'a>(attrs: &'a AttributeMap, key: &str) -> Result<&'a str, ProviderError> {
    get_str(attrs, key)
        .ok_or_else(|| ProviderError::Validation(format!("missing required attribute '{key}'")))
}

pub fn get_i64(attrs: &AttributeMap, key: &str) -> Option<i64> {
    attrs.get(key).and_then(Value::as_i64)
}

pub fn get_bool(attrs: &AttributeMap, key: &str) -> Option<bool> {
    attrs.get(key).and_then(Value::as_bool)
}

/// String list, or empty when unset.
pub fn get_str_list(attrs: &AttributeMap, key: &str) -> Vec<String> {
    match attrs.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// String map (tags), or empty when unset.
pub fn get_str_map(attrs: &AttributeMap, key: &str) -> BTreeMap<String, String> {
    match attrs.get(key) {
        Some(Value::Object(m)) => str_map(m),
        _ => BTreeMap::new(),
    }
}

pub fn str_map(m: &Map<String, Value>) -> BTreeMap<String, String> {
    m.iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

/// Split a composite ID such as `cluster,profile` into exactly `n` parts.
pub fn split_id<'a>(id: &'a str, sep: char, n: usize) -> Result<Vec<&'a str>, ProviderError> {
    let parts: Vec<&str> = id.splitn(n, sep).collect();
    if parts.len() != n || parts.iter().any(|p| p.is_empty()) {
        return Err(ProviderError::InvalidId {
            id: id.to_string(),
            reason: format!("expected {n} parts separated by '{sep}'"),
        });
    }
    Ok(parts)
}

/// Tags to set and tag keys to remove when going from `old` to `new`.
pub fn tags_diff(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let set = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let remove = old.keys().filter(|k| !new.contains_key(*k)).cloned().collect();
    (set, remove)
}

/// `{k: v}` -> `[{"Key": k, "Value": v}]`, the shape most AWS APIs use for tags.
///
/// Field names vary by service (`Key`/`Value`, `key`/`value`).
pub fn expand_tag_list(tags: &BTreeMap<String, String>, key: &str, value: &str) -> Value {
    Value::Array(
        tags.iter()
            .map(|(k, v)| {
                let mut m = Map::new();
                m.insert(key.to_string(), json!(k));
                m.insert(value.to_string(), json!(v));
                Value::Object(m)
            })
            .collect(),
    )
}

/// Inverse of [`expand_tag_list`].
pub fn flatten_tag_list(tags: &[Value], key: &str, value: &str) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|t| {
            Some((
                t.get(key)?.as_str()?.to_string(),
                t.get(value)?.as_str()?.to_string(),
            ))
        })
        .collect()
}

pub fn map_value(m: &BTreeMap<String, String>) -> Value {
    Value::Object(
        m.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Insert `value` under `key` unless it is `None`.
pub fn set_opt<T: Into<Value>>(attrs: &mut AttributeMap, key: &str, value: Option<T>) {
    if let Some(v) = value {
        attrs.insert(key.to_string(), v.into());
    }
}
