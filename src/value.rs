//! The dynamic value type carried by events, facts, and action payloads.
//!
//! Values cross the `StorageAdapter`, webhook, and SSE boundaries verbatim,
//! so the wire form is plain JSON rather than an internally-tagged envelope.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically-typed value: `null | bool | number | string | array | object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name, used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Walks a dotted path (`a.b.c`) into an object/array value.
    ///
    /// Array segments must be decimal indices. Returns `None` if any segment
    /// is missing or the path runs into a non-container value.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            if segment.is_empty() {
                continue;
            }
            current = match current {
                Self::Object(map) => map.get(segment)?,
                Self::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Renders the value the way interpolation (`${path}`) stringifies it.
    #[must_use]
    pub fn interpolated_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Array(_) | Self::Object(_) => {
                let json = serde_json::to_string(self).unwrap_or_default();
                write!(f, "{json}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n).map_or(Self::Null, Self::Number),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_variants() {
        assert!(Value::Null.is_null());
        assert!(Value::Bool(true).is_bool());
        assert!(Value::Number(1.0).is_number());
        assert!(Value::String("x".into()).is_string());
        assert!(Value::Array(vec![]).is_array());
        assert!(Value::Object(BTreeMap::new()).is_object());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::Number(42.0)), "42");
        assert_eq!(format!("{}", Value::String("hi".into())), "hi");
        assert_eq!(format!("{}", Value::Null), "null");
    }

    #[test]
    fn test_value_interpolated_string() {
        assert_eq!(Value::String("ord-1".into()).interpolated_string(), "ord-1");
        assert_eq!(Value::Null.interpolated_string(), "");
        assert_eq!(Value::Number(2500.0).interpolated_string(), "2500");
    }

    #[test]
    fn test_value_get_path_object() {
        let mut inner = BTreeMap::new();
        inner.insert("orderId".to_string(), Value::String("ord-1".into()));
        let event_data = Value::Object(inner);

        assert_eq!(event_data.get_path("orderId"), Some(&Value::String("ord-1".into())));
        assert_eq!(event_data.get_path("missing"), None);
    }

    #[test]
    fn test_value_get_path_nested() {
        let mut addr = BTreeMap::new();
        addr.insert("city".to_string(), Value::String("nyc".into()));
        let mut root = BTreeMap::new();
        root.insert("address".to_string(), Value::Object(addr));
        let v = Value::Object(root);

        assert_eq!(v.get_path("address.city"), Some(&Value::String("nyc".into())));
        assert_eq!(v.get_path("address.zip"), None);
    }

    #[test]
    fn test_value_get_path_array_index() {
        let v = Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(v.get_path("1"), Some(&Value::Number(2.0)));
        assert_eq!(v.get_path("5"), None);
    }

    #[test]
    fn test_value_json_roundtrip() {
        let v = Value::from(serde_json::json!({"a": 1, "b": [true, null, "x"]}));
        let json: serde_json::Value = v.clone().into();
        let back = Value::from(json);
        assert_eq!(v, back);
    }

    #[test]
    fn test_value_serde_is_plain_json() {
        let v = Value::String("hello".into());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"hello\"");
    }

    #[test]
    fn test_value_from_conversions() {
        let _: Value = true.into();
        let _: Value = 42i64.into();
        let _: Value = 3.14f64.into();
        let _: Value = "hello".into();
        let _: Value = String::from("hello").into();
        let _: Value = vec![Value::Number(1.0)].into();
    }
}
