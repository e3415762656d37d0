use serde::{Deserialize, Serialize};

use crate::constraints::{ForeignKeyTarget, UniqueGroup};
use crate::types::ColumnType;

/// Double-quote an SQL identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Descriptor set for the destination database, produced by introspection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaData {
    pub tables: Vec<TableDescriptor>,
}

impl MetaData {
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|table| table.name == name)
    }
}

/// A destination table and the columns the engine populates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_groups: Vec<UniqueGroup>,
}

/// Column metadata consumed by the row generation adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeyTarget>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_nullable() -> bool {
    true
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            schema: default_schema(),
            name: name.into(),
            columns,
            unique_groups: Vec::new(),
        }
    }

    pub fn with_unique(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.unique_groups.push(UniqueGroup {
            name: name.into(),
            columns: columns.iter().map(|column| column.to_string()).collect(),
        });
        self
    }

    /// `schema.table`, quoted for use in SQL.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|column| column.primary_key)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&ColumnDescriptor, &ForeignKeyTarget)> {
        self.columns
            .iter()
            .filter_map(|column| column.foreign_key.as_ref().map(|target| (column, target)))
    }

    /// Tables this table references, excluding itself.
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys()
            .map(|(_, target)| target.table.as_str())
            .filter(move |parent| *parent != self.name)
    }

    /// Key groups whose values must stay distinct: the primary key, then unique groups.
    pub fn key_groups(&self) -> Vec<Vec<String>> {
        let mut groups = Vec::new();
        let primary: Vec<String> = self.primary_key().map(|column| column.name.clone()).collect();
        if !primary.is_empty() {
            groups.push(primary);
        }
        groups.extend(self.unique_groups.iter().map(|group| group.columns.clone()));
        groups
    }
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            foreign_key: None,
            nullable: true,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn references(mut self, target: ForeignKeyTarget) -> Self {
        self.foreign_key = Some(target);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Primary key columns are left for the database to assign unless they
    /// also reference a parent row.
    pub fn is_auto_assigned(&self) -> bool {
        self.primary_key && self.foreign_key.is_none()
    }
}
