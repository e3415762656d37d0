//! In-memory destination and source used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use relsynth_core::{Row, TableDescriptor, Value, ValueKey, key_tuple};

use crate::db::{Destination, Source};
use crate::errors::{PopulateError, Result};

#[derive(Debug, Clone)]
struct MemTable {
    descriptor: TableDescriptor,
    rows: Vec<Row>,
    next_id: i64,
}

#[derive(Debug, Clone)]
struct Snapshot {
    tables: BTreeMap<String, MemTable>,
    log_len: usize,
}

/// Table store that enforces primary key, unique group, not-null and
/// foreign key constraints the way the destination database would.
///
/// Integer primary keys left unset are assigned from a per-table sequence.
#[derive(Debug)]
pub struct InMemoryDatabase {
    tables: BTreeMap<String, MemTable>,
    snapshot: Option<Snapshot>,
    insert_log: Vec<String>,
    query_results: HashMap<String, Vec<Row>>,
    queries_run: usize,
    rng: ChaCha8Rng,
}

impl InMemoryDatabase {
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        let tables = tables
            .into_iter()
            .map(|descriptor| {
                (
                    descriptor.name.clone(),
                    MemTable {
                        descriptor,
                        rows: Vec::new(),
                        next_id: 1,
                    },
                )
            })
            .collect();
        Self {
            tables,
            snapshot: None,
            insert_log: Vec::new(),
            query_results: HashMap::new(),
            queries_run: 0,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    /// Rows currently stored in `table`, including uncommitted ones.
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables
            .get(table)
            .map(|table| table.rows.as_slice())
            .unwrap_or(&[])
    }

    /// Table name of every stored insert, in order.
    pub fn insert_log(&self) -> &[String] {
        &self.insert_log
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Canned result for a source query.
    pub fn set_query_result(&mut self, query: impl Into<String>, rows: Vec<Row>) {
        self.query_results.insert(query.into(), rows);
    }

    pub fn queries_run(&self) -> usize {
        self.queries_run
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| PopulateError::InvalidPlan(format!("unknown table '{name}'")))
    }

    fn check_references(&self, table: &TableDescriptor, row: &Row) -> Result<()> {
        for (column, target) in table.foreign_keys() {
            let value = row.get(&column.name).unwrap_or(&Value::Null);
            if value.is_null() {
                continue;
            }
            let Some(parent) = self.tables.get(&target.table) else {
                continue;
            };
            let key = value.key();
            let found = parent.rows.iter().any(|parent_row| {
                parent_row
                    .get(&target.column)
                    .is_some_and(|candidate| candidate.key() == key)
            });
            // a self reference may point at the row being inserted
            let self_match = target.table == table.name
                && row
                    .get(&target.column)
                    .is_some_and(|candidate| candidate.key() == key);
            if !found && !self_match {
                return Err(PopulateError::Insert {
                    table: table.name.clone(),
                    message: format!(
                        "insert violates foreign key: {}={} not present in {}",
                        column.name, value, target
                    ),
                });
            }
        }
        Ok(())
    }

    fn referenced_by(&self, table: &MemTable) -> Option<String> {
        for other in self.tables.values() {
            for (column, target) in other.descriptor.foreign_keys() {
                if target.table != table.descriptor.name || other.rows.is_empty() {
                    continue;
                }
                let referenced: Vec<ValueKey> = table
                    .rows
                    .iter()
                    .filter_map(|row| row.get(&target.column).map(Value::key))
                    .collect();
                let dangling = other.rows.iter().any(|row| {
                    row.get(&column.name)
                        .is_some_and(|value| !value.is_null() && referenced.contains(&value.key()))
                });
                if dangling && other.descriptor.name != table.descriptor.name {
                    return Some(format!("{}.{}", other.descriptor.name, column.name));
                }
            }
        }
        None
    }
}

fn reject(table: &TableDescriptor, message: String) -> PopulateError {
    PopulateError::Insert {
        table: table.name.clone(),
        message,
    }
}

#[async_trait]
impl Destination for InMemoryDatabase {
    async fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(PopulateError::Database(
                "transaction already in progress".to_string(),
            ));
        }
        self.snapshot = Some(Snapshot {
            tables: self.tables.clone(),
            log_len: self.insert_log.len(),
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| PopulateError::Database("no transaction in progress".to_string()))
    }

    async fn rollback(&mut self) -> Result<()> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| PopulateError::Database("no transaction in progress".to_string()))?;
        self.tables = snapshot.tables;
        self.insert_log.truncate(snapshot.log_len);
        Ok(())
    }

    async fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<Row> {
        let descriptor = self.table_mut(&table.name)?.descriptor.clone();

        if let Some(unknown) = row.keys().find(|column| descriptor.column(column).is_none()) {
            return Err(reject(
                &descriptor,
                format!("column \"{unknown}\" does not exist"),
            ));
        }

        let mut stored = Row::new();
        let mut next_id = self.table_mut(&table.name)?.next_id;
        for column in &descriptor.columns {
            let mut value = row.get(&column.name).cloned().unwrap_or(Value::Null);
            if value.is_null() && column.primary_key && column.column_type.is_serial_candidate() {
                value = Value::Int(next_id);
                next_id += 1;
            }
            if value.is_null() && !column.nullable {
                return Err(reject(
                    &descriptor,
                    format!("null value in column \"{}\" violates not-null constraint", column.name),
                ));
            }
            if column.primary_key
                && let Some(id) = value.as_i64()
            {
                next_id = next_id.max(id + 1);
            }
            stored.insert(column.name.clone(), value);
        }

        let existing = &self.table_mut(&table.name)?.rows;
        for group in descriptor.key_groups() {
            let key = key_tuple(&stored, &group);
            if key.contains(&ValueKey::Null) {
                continue;
            }
            if existing.iter().any(|row| key_tuple(row, &group) == key) {
                return Err(reject(
                    &descriptor,
                    format!("duplicate key value violates unique constraint on {group:?}"),
                ));
            }
        }

        self.check_references(&descriptor, &stored)?;

        let mem = self.table_mut(&table.name)?;
        mem.next_id = next_id;
        mem.rows.push(stored.clone());
        self.insert_log.push(table.name.clone());
        Ok(stored)
    }

    async fn fetch_column_values(
        &mut self,
        table: &TableDescriptor,
        columns: &[String],
    ) -> Result<Vec<Vec<Value>>> {
        let mem = self.table_mut(&table.name)?;
        Ok(mem
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect())
    }

    async fn random_value(
        &mut self,
        table: &TableDescriptor,
        column: &str,
    ) -> Result<Option<Value>> {
        let count = self.table_mut(&table.name)?.rows.len();
        if count == 0 {
            return Ok(None);
        }
        let index = self.rng.random_range(0..count);
        let mem = self.table_mut(&table.name)?;
        if mem.descriptor.column(column).is_none() {
            return Err(PopulateError::InvalidPlan(format!(
                "unknown column '{}.{column}'",
                table.name
            )));
        }
        Ok(mem.rows[index].get(column).cloned())
    }

    async fn delete_all(&mut self, table: &TableDescriptor) -> Result<u64> {
        let mem = self
            .tables
            .get(&table.name)
            .ok_or_else(|| PopulateError::InvalidPlan(format!("unknown table '{}'", table.name)))?;
        if let Some(child) = self.referenced_by(mem) {
            return Err(PopulateError::Database(format!(
                "delete from '{}' violates foreign key from {child}",
                table.name
            )));
        }
        let mem = self.table_mut(&table.name)?;
        let removed = mem.rows.len() as u64;
        mem.rows.clear();
        Ok(removed)
    }
}

#[async_trait]
impl Source for InMemoryDatabase {
    async fn fetch_rows(&mut self, query: &str) -> Result<Vec<Row>> {
        self.queries_run += 1;
        self.query_results
            .get(query)
            .cloned()
            .ok_or_else(|| PopulateError::Database(format!("no result registered for '{query}'")))
    }
}
