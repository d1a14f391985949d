//! ST-040: Attribute schemas.
//!
//! Each resource type declares its attributes once: type, presence,
//! default, validation checks, and whether a change forces replacement.

use crate::core::types::AttributeMap;
use regex::Regex;
use serde_json::Value;
use std::fmt;

/// Value type of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrType {
    String,
    Int,
    Bool,
    List(Box<AttrType>),
    /// String-to-string map, e.g. tags
    Map,
    /// Nested object with its own attributes
    Block(Vec<Attribute>),
}

impl AttrType {
    pub fn list(inner: AttrType) -> Self {
        Self::List(Box::new(inner))
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::List(inner) => write!(f, "list({inner})"),
            Self::Map => write!(f, "map(string)"),
            Self::Block(_) => write!(f, "block"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    /// Set by AWS, never by configuration
    Computed,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "required"),
            Self::Optional => write!(f, "optional"),
            Self::Computed => write!(f, "computed"),
        }
    }
}

/// Validation applied to a value (to each element, for lists).
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    OneOf(&'static [&'static str]),
    IntRange(i64, i64),
    Pattern(&'static str),
    Length(usize, usize),
}

impl Check {
    fn apply(&self, path: &str, value: &Value) -> Option<String> {
        match (self, value) {
            (Self::OneOf(allowed), Value::String(s)) => (!allowed.contains(&s.as_str()))
                .then(|| format!("{path}: '{s}' must be one of {}", allowed.join(", "))),
            (Self::IntRange(lo, hi), Value::Number(n)) => match n.as_i64() {
                Some(v) if v >= *lo && v <= *hi => None,
                _ => Some(format!("{path}: {n} must be between {lo} and {hi}")),
            },
            (Self::Pattern(p), Value::String(s)) => match Regex::new(p) {
                Ok(re) if re.is_match(s) => None,
                Ok(_) => Some(format!("{path}: '{s}' does not match {p}")),
                Err(e) => Some(format!("{path}: bad pattern {p}: {e}")),
            },
            (Self::Length(lo, hi), Value::String(s)) => {
                let n = s.chars().count();
                (n < *lo || n > *hi)
                    .then(|| format!("{path}: length {n} must be between {lo} and {hi}"))
            }
            _ => None,
        }
    }
}

/// One attribute declaration. Built with the `required`/`optional`/`computed`
/// constructors and the chained modifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: &'static str,
    pub ty: AttrType,
    pub presence: Presence,
    pub default: Option<Value>,
    pub checks: Vec<Check>,
    pub force_new: bool,
    /// Never returned by the read API; kept in state only and skipped by refresh.
    pub write_only: bool,
    pub description: &'static str,
}

impl Attribute {
    fn new(name: &'static str, ty: AttrType, presence: Presence) -> Self {
        Self {
            name,
            ty,
            presence,
            default: None,
            checks: Vec::new(),
            force_new: false,
            write_only: false,
            description: "",
        }
    }

    pub fn required(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Presence::Required)
    }

    pub fn optional(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Presence::Optional)
    }

    pub fn computed(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Presence::Computed)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn is_configurable(&self) -> bool {
        self.presence != Presence::Computed
    }
}

/// Full schema of one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSchema {
    pub attributes: Vec<Attribute>,
}

impl ResourceSchema {
    pub fn new() -> Self {
        Self {
            attributes: Vec::new(),
        }
    }

    pub fn attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// All validation errors for a desired attribute map. Empty means valid.
    pub fn validate(&self, attrs: &AttributeMap) -> Vec<String> {
        let mut errors = Vec::new();
        let values: Vec<_> = attrs.iter().collect();
        validate_object(&self.attributes, "", &values, &mut errors);
        errors
    }

    /// Fill in declared defaults for unset optional attributes.
    pub fn with_defaults(&self, attrs: &AttributeMap) -> AttributeMap {
        let mut out = attrs.clone();
        for attr in &self.attributes {
            if let Some(ref default) = attr.default {
                if !out.contains_key(attr.name) || out[attr.name].is_null() {
                    out.insert(attr.name.to_string(), default.clone());
                }
            }
        }
        out
    }

    /// Configurable attributes only, in declaration order.
    pub fn configurable(&self, attrs: &AttributeMap) -> AttributeMap {
        self.attributes
            .iter()
            .filter(|a| a.is_configurable())
            .filter_map(|a| attrs.get(a.name).map(|v| (a.name.to_string(), v.clone())))
            .collect()
    }

    /// Configurable attributes that a read can report back. Refresh compares
    /// these against the live resource.
    pub fn observable(&self, attrs: &AttributeMap) -> AttributeMap {
        self.attributes
            .iter()
            .filter(|a| a.is_configurable() && !a.write_only)
            .filter_map(|a| attrs.get(a.name).map(|v| (a.name.to_string(), v.clone())))
            .collect()
    }

    /// Computed attributes only.
    pub fn computed(&self, attrs: &AttributeMap) -> AttributeMap {
        self.attributes
            .iter()
            .filter(|a| !a.is_configurable())
            .filter_map(|a| attrs.get(a.name).map(|v| (a.name.to_string(), v.clone())))
            .collect()
    }

    /// Configurable attributes whose values differ between prior and desired.
    pub fn changed(&self, prior: &AttributeMap, desired: &AttributeMap) -> Vec<&'static str> {
        self.attributes
            .iter()
            .filter(|a| a.is_configurable())
            .filter(|a| {
                let p = prior.get(a.name).unwrap_or(&Value::Null);
                let d = desired.get(a.name).unwrap_or(&Value::Null);
                p != d
            })
            .map(|a| a.name)
            .collect()
    }

    /// True when at least one configurable attribute can change without replacement.
    pub fn updatable_in_place(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| a.is_configurable() && !a.force_new)
    }

    /// Changed attributes that cannot be updated in place.
    pub fn force_new_changes(
        &self,
        prior: &AttributeMap,
        desired: &AttributeMap,
    ) -> Vec<&'static str> {
        self.changed(prior, desired)
            .into_iter()
            .filter(|name| self.get(name).is_some_and(|a| a.force_new))
            .collect()
    }
}

impl Default for ResourceSchema {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_object(
    attrs: &[Attribute],
    prefix: &str,
    values: &[(&String, &Value)],
    errors: &mut Vec<String>,
) {
    for (key, _) in values {
        if !attrs.iter().any(|a| a.name == key.as_str()) {
            errors.push(format!("{prefix}{key}: unknown attribute"));
        }
    }
    for attr in attrs {
        let path = format!("{prefix}{}", attr.name);
        let value = values
            .iter()
            .find(|(k, _)| k.as_str() == attr.name)
            .map(|(_, v)| *v)
            .filter(|v| !v.is_null());
        match (attr.presence, value) {
            (Presence::Required, None) => {
                errors.push(format!("{path}: required attribute is missing"));
            }
            (Presence::Computed, Some(_)) => {
                errors.push(format!("{path}: computed attribute cannot be set"));
            }
            (_, Some(v)) => validate_value(&attr.ty, &attr.checks, &path, v, errors),
            _ => {}
        }
    }
}

fn validate_value(ty: &AttrType, checks: &[Check], path: &str, value: &Value, errors: &mut Vec<String>) {
    match (ty, value) {
        (AttrType::String, Value::String(_)) | (AttrType::Bool, Value::Bool(_)) => {}
        (AttrType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => {}
        (AttrType::List(inner), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_value(inner, checks, &format!("{path}[{i}]"), item, errors);
            }
            return;
        }
        (AttrType::Map, Value::Object(m)) => {
            for (k, v) in m {
                if !v.is_string() {
                    errors.push(format!("{path}.{k}: expected string value"));
                }
            }
        }
        (AttrType::Block(nested), Value::Object(m)) => {
            let fields: Vec<_> = m.iter().collect();
            validate_object(nested, &format!("{path}."), &fields, errors);
        }
        _ => {
            errors.push(format!("{path}: expected {ty}"));
            return;
        }
    }
    errors.extend(checks.iter().filter_map(|c| c.apply(path, value)));
}
