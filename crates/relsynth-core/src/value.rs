use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single column value.
///
/// Deserialization is untagged: JSON/TOML strings always become `Text`,
/// integers `Int` and other numbers `Float`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

/// One row: column name to value.
pub type Row = BTreeMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) | Value::Uuid(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Hashable identity of this value, used for uniqueness bookkeeping.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(value) => ValueKey::Bool(*value),
            Value::Int(value) => ValueKey::Int(*value),
            // integral floats compare equal to the integer the database would store
            Value::Float(value)
                if value.fract() == 0.0 && value.abs() < i64::MAX as f64 =>
            {
                ValueKey::Int(*value as i64)
            }
            Value::Float(value) => ValueKey::Float(value.to_bits()),
            Value::Text(value) | Value::Uuid(value) => ValueKey::Text(value.clone()),
            Value::Date(value) => ValueKey::Date(*value),
            Value::Timestamp(value) => ValueKey::Timestamp(*value),
            Value::Bytes(value) => ValueKey::Bytes(value.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(value) | Value::Uuid(value) => write!(f, "{value}"),
            Value::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            Value::Timestamp(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Bytes(value) => write!(f, "<{} bytes>", value.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Hashable projection of a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

/// Ordered key over the columns of one uniqueness constraint.
pub type KeyTuple = Vec<ValueKey>;

/// Build the key tuple for `columns` from a row; missing columns count as NULL.
pub fn key_tuple(row: &Row, columns: &[String]) -> KeyTuple {
    columns
        .iter()
        .map(|column| row.get(column).map(Value::key).unwrap_or(ValueKey::Null))
        .collect()
}
