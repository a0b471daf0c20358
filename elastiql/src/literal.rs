//! Scalar literal values and their SQL rendering

use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Result, TranslateError};

/// A single scalar value taken from a request
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Literal {
    /// Convert a JSON scalar. Arrays and objects are rejected.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Literal::Null),
            Value::Bool(b) => Ok(Literal::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Literal::Int(i)),
                None => Ok(Literal::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => Ok(Literal::String(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(TranslateError::malformed(format!(
                "expected a scalar value, got {}",
                value
            ))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Literal::Bool(_))
    }

    /// Value as JSON, timestamps rendered as RFC 3339
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::from(*i),
            Literal::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Timestamp(ts) => Value::String(rfc3339_nano(ts)),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Bool(true) => f.write_str("TRUE"),
            Literal::Bool(false) => f.write_str("FALSE"),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(v) if v.is_finite() => write!(f, "{}", v),
            Literal::Float(_) => f.write_str("NULL"),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Timestamp(ts) => write!(f, "`{}`", rfc3339_nano(ts)),
        }
    }
}

impl<'de> Deserialize<'de> for Literal {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Literal::from_json(&value).map_err(serde::de::Error::custom)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

impl From<i32> for Literal {
    fn from(i: i32) -> Self {
        Literal::Int(i as i64)
    }
}

impl From<f64> for Literal {
    fn from(f: f64) -> Self {
        Literal::Float(f)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

/// RFC 3339 with up to nine fractional digits, trailing zeros trimmed
pub fn rfc3339_nano(ts: &DateTime<Utc>) -> String {
    let base = ts.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = ts.nanosecond() % 1_000_000_000;
    if nanos == 0 {
        return format!("{}Z", base);
    }
    let frac = format!("{:09}", nanos);
    format!("{}.{}Z", base, frac.trim_end_matches('0'))
}
