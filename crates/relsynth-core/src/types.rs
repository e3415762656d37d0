use serde::{Deserialize, Serialize};

/// Semantic column type, coarse enough to drive value encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Numeric,
    Text,
    Boolean,
    Date,
    Timestamp,
    Uuid,
    Binary,
    /// Any other database type; values travel as text.
    Other(String),
}

impl ColumnType {
    /// Whether the database can assign values of this type from a sequence.
    pub fn is_serial_candidate(&self) -> bool {
        matches!(self, ColumnType::Integer)
    }

    /// Postgres type name used when casting a bound parameter to this type.
    pub fn sql_type(&self) -> &str {
        match self {
            ColumnType::Integer => "int8",
            ColumnType::Float => "float8",
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Boolean => "bool",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Uuid => "uuid",
            ColumnType::Binary => "bytea",
            ColumnType::Other(name) => name.as_str(),
        }
    }
}
