//! Cursor values: the resumable position marker of a sequence.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Position of a sequence, carried between runs inside the job payload.
///
/// The variants cover the values a JSON transport is expected to carry.
/// `Timestamp` is intentionally representable: it serializes as an RFC 3339
/// string but decodes back as [`Cursor::Str`], so the codec rejects it.
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    Bool(bool),
    Int(i64),
    /// Non-finite values encode as `null` and do not survive a round trip.
    Float(f64),
    Str(String),
    List(Vec<Cursor>),
    /// Ordered by key.
    Map(BTreeMap<String, Cursor>),
    Timestamp(DateTime<Utc>),
}

impl Cursor {
    /// Name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a key of a map cursor.
    pub fn get(&self, key: &str) -> Option<&Cursor> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Build a map cursor from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Cursor)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Float(v) if !v.is_finite() => write!(f, "{}", v),
            other => match serde_json::to_string(other) {
                Ok(json) => f.write_str(&json),
                Err(_) => write!(f, "{:?}", other),
            },
        }
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => items.serialize(serializer),
            Self::Map(map) => map.serialize(serializer),
            Self::Timestamp(t) => t.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Cursor::try_from(value).map_err(de::Error::custom)
    }
}

impl TryFrom<Value> for Cursor {
    type Error = String;

    /// Convert a decoded JSON value. Strings always stay strings.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Err("null is not a cursor value".to_string()),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if n.is_u64() {
                    Err(format!("integer {} is out of cursor range", n))
                } else {
                    n.as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| format!("unsupported number {}", n))
                }
            }
            Value::String(s) => Ok(Self::Str(s)),
            Value::Array(items) => items
                .into_iter()
                .map(Cursor::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::List),
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| Cursor::try_from(v).map(|c| (k, c)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Map),
        }
    }
}

impl From<i64> for Cursor {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Cursor {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Cursor {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<usize> for Cursor {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for Cursor {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Cursor {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Cursor {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Cursor {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<DateTime<Utc>> for Cursor {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Cursor>> From<Vec<T>> for Cursor {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}
