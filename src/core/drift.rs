//! ST-008: Drift detection: compare recorded attributes to what AWS reports.
//!
//! A recorded value matches when every key it holds is present in the live
//! value with a matching value. Keys AWS fills in on its own are ignored.

use super::types::{AttributeMap, ResourceType};
use serde_json::Value;

/// A single drift finding.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftFinding {
    pub resource_id: String,
    pub resource_type: ResourceType,
    /// Attributes whose live value no longer matches the lock
    pub attributes: Vec<String>,
    pub detail: String,
}

/// True when `recorded` is contained in `live`.
///
/// Objects match key by key, arrays element by element with equal lengths,
/// scalars by equality. Numbers compare by value, so `90` matches `90.0`.
pub fn subset_matches(recorded: &Value, live: &Value) -> bool {
    match (recorded, live) {
        (Value::Object(r), Value::Object(l)) => r.iter().all(|(k, rv)| match l.get(k) {
            Some(lv) => subset_matches(rv, lv),
            None => rv.is_null(),
        }),
        (Value::Array(r), Value::Array(l)) => {
            r.len() == l.len() && r.iter().zip(l).all(|(rv, lv)| subset_matches(rv, lv))
        }
        (Value::Number(r), Value::Number(l)) => r.as_f64() == l.as_f64(),
        (r, l) => r == l,
    }
}

/// Names of recorded attributes that differ from the live ones.
pub fn drifted_attributes(recorded: &AttributeMap, live: &AttributeMap) -> Vec<String> {
    recorded
        .iter()
        .filter(|(k, rv)| match live.get(*k) {
            Some(lv) => !subset_matches(rv, lv),
            None => !rv.is_null(),
        })
        .map(|(k, _)| k.clone())
        .collect()
}

/// Compare one resource; `None` when nothing drifted.
pub fn check_drift(
    resource_id: &str,
    resource_type: ResourceType,
    recorded: &AttributeMap,
    live: Option<&AttributeMap>,
) -> Option<DriftFinding> {
    let Some(live) = live else {
        return Some(DriftFinding {
            resource_id: resource_id.to_string(),
            resource_type,
            attributes: Vec::new(),
            detail: "no longer exists".to_string(),
        });
    };
    let attributes = drifted_attributes(recorded, live);
    if attributes.is_empty() {
        return None;
    }
    let detail = format!("changed outside stratus: {}", attributes.join(", "));
    Some(DriftFinding {
        resource_id: resource_id.to_string(),
        resource_type,
        attributes,
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(v: Value) -> AttributeMap {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_st008_extra_live_keys_ignored() {
        let recorded = json!({"namespace": "default"});
        let live = json!({"namespace": "default", "labels": {}});
        assert!(subset_matches(&recorded, &live));
        assert!(!subset_matches(&live, &recorded));
    }

    #[test]
    fn test_st008_arrays_are_positional() {
        assert!(subset_matches(&json!([{"a": 1}]), &json!([{"a": 1, "b": 2}])));
        assert!(!subset_matches(&json!(["a", "b"]), &json!(["b", "a"])));
        assert!(!subset_matches(&json!(["a"]), &json!(["a", "b"])));
    }

    #[test]
    fn test_st008_numbers_by_value() {
        assert!(subset_matches(&json!(90), &json!(90.0)));
        assert!(!subset_matches(&json!(90), &json!(91)));
    }

    #[test]
    fn test_st008_null_matches_absent() {
        assert!(subset_matches(&json!({"kms": null}), &json!({})));
        let recorded = attrs(json!({"kms_key_id": null, "name": "x"}));
        let live = attrs(json!({"name": "x"}));
        assert!(drifted_attributes(&recorded, &live).is_empty());
    }

    #[test]
    fn test_st008_check_drift() {
        let recorded = attrs(json!({"name": "x", "tags": {"env": "prod"}}));
        let live = attrs(json!({"name": "x", "tags": {"env": "dev"}, "arn": "arn:x"}));
        let finding = check_drift("build", ResourceType::CodebuildProject, &recorded, Some(&live)).unwrap();
        assert_eq!(finding.attributes, vec!["tags"]);
        assert_eq!(finding.detail, "changed outside stratus: tags");

        assert!(check_drift("build", ResourceType::CodebuildProject, &recorded, Some(&recorded)).is_none());

        let gone = check_drift("build", ResourceType::CodebuildProject, &recorded, None).unwrap();
        assert_eq!(gone.detail, "no longer exists");
    }
}
