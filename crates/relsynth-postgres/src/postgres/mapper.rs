use chrono::{DateTime, NaiveDate, NaiveDateTime};

use relsynth_core::{ColumnType, Row, Value};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMPTZ_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%#z";

/// Text form of `value` as Postgres accepts it for an explicit cast.
pub fn to_sql_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(value) => Some(value.to_string()),
        Value::Int(value) => Some(value.to_string()),
        Value::Float(value) => Some(value.to_string()),
        Value::Text(value) | Value::Uuid(value) => Some(value.clone()),
        Value::Date(value) => Some(value.format(DATE_FORMAT).to_string()),
        Value::Timestamp(value) => Some(value.format(TIMESTAMP_FORMAT).to_string()),
        Value::Bytes(value) => Some(format!("\\x{}", hex::encode(value))),
    }
}

/// Parse the `::text` rendering of a column back into a value of its type.
///
/// Text that does not parse as the declared type is kept as `Text`.
pub fn from_sql_text(column_type: &ColumnType, text: Option<String>) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    let parsed = match column_type {
        ColumnType::Integer => text.parse().ok().map(Value::Int),
        ColumnType::Float | ColumnType::Numeric => text.parse().ok().map(Value::Float),
        ColumnType::Boolean => match text.as_str() {
            "true" | "t" => Some(Value::Bool(true)),
            "false" | "f" => Some(Value::Bool(false)),
            _ => None,
        },
        ColumnType::Date => NaiveDate::parse_from_str(&text, DATE_FORMAT)
            .ok()
            .map(Value::Date),
        ColumnType::Timestamp => parse_timestamp(&text).map(Value::Timestamp),
        ColumnType::Uuid => Some(Value::Uuid(text.clone())),
        ColumnType::Binary => text
            .strip_prefix("\\x")
            .and_then(|hex_digits| hex::decode(hex_digits).ok())
            .map(Value::Bytes),
        ColumnType::Text | ColumnType::Other(_) => None,
    };
    parsed.unwrap_or(Value::Text(text))
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            DateTime::parse_from_str(text, TIMESTAMPTZ_FORMAT)
                .ok()
                .map(|value| value.naive_utc())
        })
}

/// Convert one `row_to_json` object into a row.
pub fn row_from_json(json: serde_json::Value) -> Option<Row> {
    let serde_json::Value::Object(map) = json else {
        return None;
    };
    Some(
        map.into_iter()
            .map(|(column, value)| (column, value_from_json(value)))
            .collect(),
    )
}

fn value_from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(value) => Value::Bool(value),
        serde_json::Value::Number(number) => number
            .as_i64()
            .map(Value::Int)
            .or_else(|| number.as_f64().map(Value::Float))
            .unwrap_or_else(|| Value::Text(number.to_string())),
        serde_json::Value::String(value) => Value::Text(value),
        other => Value::Text(other.to_string()),
    }
}
