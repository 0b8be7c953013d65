//! Tagged values for schema-less documents.
//!
//! Documents arrive with a runtime-determined shape, so every field value is a
//! [`Value`]: a small tagged union over the JSON types plus a first-class
//! datetime. Map and reduce functions consume and produce `Value`s.
//!
//! # JSON representation
//!
//! `Value` serializes through `serde_json::Value` as plain JSON. Datetimes are
//! written as RFC 3339 strings and read back as strings, so plain JSON loses
//! the distinction. Where types must survive a round trip (contributions held
//! by the mapped-result tracker) use [`Value::to_tagged_json`], which records
//! each variant next to its payload.
//!
//! ```
//! use divan::document::value::Value;
//!
//! let user = Value::object([("Name", Value::from("ayende")), ("Age", Value::from(3))]);
//! assert_eq!(user.get("Name").and_then(Value::as_str), Some("ayende"));
//! assert_eq!(user.to_canonical_json(), r#"{"Age":3,"Name":"ayende"}"#);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::encode_datetime;
use crate::error::Result;

/// A field value in a document, contribution, or reduce output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "serde_json::Value", from = "serde_json::Value")]
pub enum Value {
    /// Explicit null.
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
    /// Nested object, keys sorted.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Build an object value from `(name, value)` pairs.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Look up a field of an object value. Returns `None` for non-objects.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(field),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of integers and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    /// Compact JSON text. Object keys are emitted in sorted order, which makes
    /// the output stable for structurally equal values.
    pub fn to_canonical_json(&self) -> String {
        serde_json::Value::from(self.clone()).to_string()
    }

    /// JSON text that records the variant of every nested value, e.g.
    /// `{"type":"datetime","value":"2010-05-15T00:00:00Z"}`.
    pub fn to_tagged_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&Tagged::from(self))?)
    }

    /// Inverse of [`Value::to_tagged_json`].
    pub fn from_tagged_json(text: &str) -> Result<Value> {
        Ok(serde_json::from_str::<Tagged>(text)?.into())
    }

    /// Textual form used as an aggregation key.
    ///
    /// Primitives stringify verbatim, datetimes use the sortable index
    /// encoding, lists and objects use [`Value::to_canonical_json`].
    pub fn to_key_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => encode_datetime(dt),
            Value::Null => String::new(),
            Value::List(_) | Value::Object(_) => self.to_canonical_json(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            _ => f.write_str(&self.to_canonical_json()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum Tagged {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    List(Vec<Tagged>),
    Object(BTreeMap<String, Tagged>),
}

impl From<&Value> for Tagged {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Tagged::Null,
            Value::Bool(b) => Tagged::Bool(*b),
            Value::Integer(i) => Tagged::Integer(*i),
            Value::Float(f) => Tagged::Float(*f),
            Value::String(s) => Tagged::String(s.clone()),
            Value::DateTime(dt) => Tagged::DateTime(*dt),
            Value::List(items) => Tagged::List(items.iter().map(Tagged::from).collect()),
            Value::Object(map) => Tagged::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Tagged::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Tagged> for Value {
    fn from(tagged: Tagged) -> Self {
        match tagged {
            Tagged::Null => Value::Null,
            Tagged::Bool(b) => Value::Bool(b),
            Tagged::Integer(i) => Value::Integer(i),
            Tagged::Float(f) => Value::Float(f),
            Tagged::String(s) => Value::String(s),
            Tagged::DateTime(dt) => Value::DateTime(dt),
            Tagged::List(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Tagged::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}
