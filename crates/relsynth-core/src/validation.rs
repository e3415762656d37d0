use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::graph::insertion_order;
use crate::schema::MetaData;

/// Validate internal consistency of a descriptor set.
///
/// This checks:
/// - duplicate tables/columns
/// - foreign key targets exist
/// - unique group columns exist
/// - the foreign key graph is acyclic
pub fn validate_metadata(metadata: &MetaData) -> Result<()> {
    let mut catalog: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for table in &metadata.tables {
        if catalog.contains_key(table.name.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "duplicate table name: {}",
                table.name
            )));
        }

        let mut columns = BTreeSet::new();
        for column in &table.columns {
            if !columns.insert(column.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate column name: {}.{}",
                    table.name, column.name
                )));
            }
        }
        catalog.insert(table.name.as_str(), columns);
    }

    for table in &metadata.tables {
        for (column, target) in table.foreign_keys() {
            let ref_columns = catalog.get(target.table.as_str()).ok_or_else(|| {
                Error::InvalidSchema(format!(
                    "referenced table not found for {}.{}: {}",
                    table.name, column.name, target
                ))
            })?;
            if !ref_columns.contains(target.column.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "referenced column not found for {}.{}: {}",
                    table.name, column.name, target
                )));
            }
        }

        for group in &table.unique_groups {
            if group.columns.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "unique group {} on {} has no columns",
                    group.name, table.name
                )));
            }
            for column in &group.columns {
                if table.column(column).is_none() {
                    return Err(Error::InvalidSchema(format!(
                        "unique column not found: {}.{} ({})",
                        table.name, column, group.name
                    )));
                }
            }
        }
    }

    insertion_order(&metadata.tables)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescriptor, TableDescriptor};
    use crate::types::ColumnType;

    fn person() -> TableDescriptor {
        TableDescriptor::new(
            "person",
            vec![
                ColumnDescriptor::new("person_id", ColumnType::Integer).primary(),
                ColumnDescriptor::new("email", ColumnType::Text),
            ],
        )
    }

    #[test]
    fn accepts_consistent_metadata() {
        let visit = TableDescriptor::new(
            "visit",
            vec![
                ColumnDescriptor::new("visit_id", ColumnType::Integer).primary(),
                ColumnDescriptor::new("person_id", ColumnType::Integer)
                    .references("public.person.person_id".parse().unwrap()),
            ],
        );
        let metadata = MetaData {
            tables: vec![person().with_unique("person_email_key", &["email"]), visit],
        };
        validate_metadata(&metadata).expect("valid metadata");
    }

    #[test]
    fn rejects_missing_reference_column() {
        let visit = TableDescriptor::new(
            "visit",
            vec![
                ColumnDescriptor::new("person_id", ColumnType::Integer)
                    .references("public.person.id".parse().unwrap()),
            ],
        );
        let metadata = MetaData {
            tables: vec![person(), visit],
        };
        let err = validate_metadata(&metadata).unwrap_err();
        assert!(err.to_string().contains("referenced column not found"));
    }

    #[test]
    fn rejects_unknown_unique_column() {
        let metadata = MetaData {
            tables: vec![person().with_unique("bad", &["phone"])],
        };
        assert!(validate_metadata(&metadata).is_err());
    }

    #[test]
    fn rejects_duplicate_tables() {
        let metadata = MetaData {
            tables: vec![person(), person()],
        };
        let err = validate_metadata(&metadata).unwrap_err();
        assert!(err.to_string().contains("duplicate table name"));
    }
}
