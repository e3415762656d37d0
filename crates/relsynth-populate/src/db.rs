//! Seams between the engine and the databases it reads from and writes to.

use async_trait::async_trait;

use relsynth_core::{Row, TableDescriptor, Value};

use crate::errors::Result;

/// Write side of a population run.
///
/// One table transaction is open at a time. `insert_row` is atomic on its own:
/// a rejected row returns [`PopulateError::Insert`](crate::PopulateError::Insert)
/// and leaves the open transaction usable for the next row.
#[async_trait]
pub trait Destination: Send {
    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Insert one row and return it as stored, including server-assigned defaults.
    async fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<Row>;

    /// Current values of `columns` for every row of `table`.
    async fn fetch_column_values(
        &mut self,
        table: &TableDescriptor,
        columns: &[String],
    ) -> Result<Vec<Vec<Value>>>;

    /// Value of `column` from a uniformly random row, `None` when the table is empty.
    async fn random_value(&mut self, table: &TableDescriptor, column: &str)
    -> Result<Option<Value>>;

    /// Delete every row of `table`, returning the number removed.
    async fn delete_all(&mut self, table: &TableDescriptor) -> Result<u64>;
}

/// Read-only side of a run, used to compute source statistics.
#[async_trait]
pub trait Source: Send {
    async fn fetch_rows(&mut self, query: &str) -> Result<Vec<Row>>;
}
