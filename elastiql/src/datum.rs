//! Values returned by the SQL engine

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::literal::rfc3339_nano;

/// A value decoded from the engine result. Structs keep their keys sorted
/// so that hashing and rendering are deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Datum {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Datum>),
    Struct(BTreeMap<String, Datum>),
}

impl Datum {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Datum::Null,
            Value::Bool(b) => Datum::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Datum::Int(i),
                None => Datum::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Datum::String(s.clone()),
            Value::Array(items) => Datum::List(items.iter().map(Datum::from_json).collect()),
            Value::Object(map) => Datum::Struct(
                map.iter()
                    .map(|(k, v)| (k.clone(), Datum::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Datum::Null => Value::Null,
            Datum::Bool(b) => Value::Bool(*b),
            Datum::Int(i) => Value::from(*i),
            Datum::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Datum::String(s) => Value::String(s.clone()),
            Datum::Timestamp(ts) => Value::String(rfc3339_nano(ts)),
            Datum::List(items) => Value::Array(items.iter().map(Datum::to_json).collect()),
            Datum::Struct(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Numeric value as an integer; floats are truncated
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int(i) => Some(*i),
            Datum::Float(f) if f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int(i) => Some(*i as f64),
            Datum::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamps and RFC 3339 strings; JSON transports carry timestamps as text
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Datum::Timestamp(ts) => Some(*ts),
            Datum::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Datum>> {
        match self {
            Datum::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Feed a canonical byte form into the hasher. Nulls contribute nothing.
    pub fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            Datum::Null => {}
            Datum::Struct(fields) => {
                for (key, value) in fields {
                    hasher.update(key.as_bytes());
                    value.hash_into(hasher);
                }
            }
            Datum::List(items) => {
                for item in items {
                    item.hash_into(hasher);
                }
            }
            other => hasher.update(other.to_json().to_string().as_bytes()),
        }
    }
}

impl Serialize for Datum {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Datum {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Datum::from_json(&value))
    }
}

impl From<Value> for Datum {
    fn from(value: Value) -> Self {
        Datum::from_json(&value)
    }
}
