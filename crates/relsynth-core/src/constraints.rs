use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Column referenced by a foreign key, written `schema.table.column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeyTarget {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl FromStr for ForeignKeyTarget {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        // the column is the last segment; a bare `table.column` means the default schema
        let mut parts = raw.rsplitn(3, '.');
        let column = parts.next().filter(|part| !part.is_empty());
        let table = parts.next().filter(|part| !part.is_empty());
        let schema = parts.next().unwrap_or("public");
        match (column, table) {
            (Some(column), Some(table)) if !schema.is_empty() => Ok(Self {
                schema: schema.to_string(),
                table: table.to_string(),
                column: column.to_string(),
            }),
            _ => Err(Error::InvalidForeignKey(raw.to_string())),
        }
    }
}

impl fmt::Display for ForeignKeyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.schema, self.table, self.column)
    }
}

impl Serialize for ForeignKeyTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ForeignKeyTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Unique constraint (or unique index) over one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueGroup {
    pub name: String,
    pub columns: Vec<String>,
}
