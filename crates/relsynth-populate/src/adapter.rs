//! Invocation of per-table row generators.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use relsynth_core::{MetaData, Row, TableDescriptor, Value};

use crate::db::Destination;
use crate::errors::{PopulateError, Result};
use crate::stats::SourceStats;

/// Everything a row generator may consult while producing one row.
pub struct GenerationContext<'a> {
    pub pass: u32,
    pub table: &'a TableDescriptor,
    pub metadata: &'a MetaData,
    pub stats: &'a SourceStats,
    pub dst: &'a mut dyn Destination,
    pub rng: &'a mut ChaCha8Rng,
}

/// Produces the data columns of one row of a single table.
#[async_trait]
pub trait RowGenerator: Send {
    async fn generate(&mut self, ctx: &mut GenerationContext<'_>) -> Result<Row>;
}

/// Row generator backed by a closure; it may not touch the destination.
pub struct FnGenerator<F>(F);

/// Wrap a closure as a [`RowGenerator`].
pub fn from_fn<F>(generate: F) -> FnGenerator<F>
where
    F: FnMut(&mut ChaCha8Rng, &SourceStats) -> Result<Row> + Send,
{
    FnGenerator(generate)
}

#[async_trait]
impl<F> RowGenerator for FnGenerator<F>
where
    F: FnMut(&mut ChaCha8Rng, &SourceStats) -> Result<Row> + Send,
{
    async fn generate(&mut self, ctx: &mut GenerationContext<'_>) -> Result<Row> {
        (self.0)(&mut *ctx.rng, ctx.stats)
    }
}

/// Custom generators keyed by table name; tables without one use their column rules.
#[derive(Default)]
pub struct GeneratorRegistry {
    generators: BTreeMap<String, Box<dyn RowGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: impl Into<String>, generator: impl RowGenerator + 'static) {
        self.generators.insert(table.into(), Box::new(generator));
    }

    pub fn with(mut self, table: impl Into<String>, generator: impl RowGenerator + 'static) -> Self {
        self.register(table, generator);
        self
    }

    pub fn take(&mut self, table: &str) -> Option<Box<dyn RowGenerator>> {
        self.generators.remove(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("tables", &self.generators.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Run `generator` once and shape the result into an insertable row.
///
/// Auto-assigned primary keys are dropped. Foreign keys the generator left
/// unset are pointed at a random existing parent row, or set to null when the
/// table has none and the column allows it.
pub async fn generate_row(
    generator: &mut dyn RowGenerator,
    ctx: &mut GenerationContext<'_>,
) -> Result<Row> {
    generate_row_with(generator, ctx, Row::new()).await
}

/// Like [`generate_row`], with `overrides` merged over the generated values
/// before foreign keys are filled. Overrides may set any column, including
/// primary keys.
pub async fn generate_row_with(
    generator: &mut dyn RowGenerator,
    ctx: &mut GenerationContext<'_>,
    overrides: Row,
) -> Result<Row> {
    let mut row = generator.generate(ctx).await?;
    let table = ctx.table;

    for column in table.columns.iter().filter(|column| column.is_auto_assigned()) {
        if row.remove(&column.name).is_some() {
            debug!(table = %table.name, column = %column.name, "dropped generated primary key");
        }
    }
    row.extend(overrides);

    if let Some(unknown) = row.keys().find(|column| table.column(column).is_none()) {
        return Err(PopulateError::UnknownColumn {
            table: table.name.clone(),
            column: unknown.clone(),
        });
    }

    for (column, target) in table.foreign_keys() {
        if row.contains_key(&column.name) {
            continue;
        }
        let parent = ctx.metadata.table(&target.table).ok_or_else(|| {
            PopulateError::InvalidPlan(format!(
                "'{}.{}' references unknown table '{}'",
                table.name, column.name, target.table
            ))
        })?;
        let value = match ctx.dst.random_value(parent, &target.column).await? {
            Some(value) => value,
            None if column.nullable => Value::Null,
            None => {
                return Err(PopulateError::MissingParent {
                    table: table.name.clone(),
                    column: column.name.clone(),
                    parent: target.table.clone(),
                });
            }
        };
        row.insert(column.name.clone(), value);
    }

    Ok(row)
}
