//! Attribute values attached to spans, events and resources.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered attribute map. Ordering keeps payloads deterministic.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A variant value: int, double, bool or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Double(f64),
    /// String value.
    String(String),
}

impl AttributeValue {
    /// Integer view of the value. Strings holding an integer are accepted.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String view of the value, if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view of the value, if it is a bool.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Double(v) => serde_json::Value::from(*v),
            Self::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_serialization() {
        let mut attrs = Attributes::new();
        attrs.insert("count".into(), 3i64.into());
        attrs.insert("ratio".into(), 0.5.into());
        attrs.insert("ok".into(), true.into());
        attrs.insert("name".into(), "checkout".into());

        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(
            json,
            r#"{"count":3,"name":"checkout","ok":true,"ratio":0.5}"#
        );

        let back: Attributes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn integer_view_accepts_numeric_strings() {
        assert_eq!(AttributeValue::Int(10).as_i64(), Some(10));
        assert_eq!(AttributeValue::from("11").as_i64(), Some(11));
        assert_eq!(AttributeValue::from("eleven").as_i64(), None);
        assert_eq!(AttributeValue::Bool(true).as_i64(), None);
    }
}
