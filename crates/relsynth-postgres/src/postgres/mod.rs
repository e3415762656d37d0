use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row as _};
use tracing::{debug, info};

use relsynth_core::{Row, TableDescriptor, Value, redact_connection_string};
use relsynth_populate::{Destination, PopulateError, Result, Source};

use crate::options::ConnectOptions;

pub mod mapper;
pub mod queries;

/// Open a pool against `url`.
pub async fn connect_pool(url: &str, options: &ConnectOptions) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(options.acquire_timeout)
        .connect(url)
        .await
        .map_err(db_error)?;
    info!(url = %redact_connection_string(url), "connected to postgres");
    Ok(pool)
}

fn db_error(err: sqlx::Error) -> PopulateError {
    PopulateError::Database(err.to_string())
}

/// Postgres destination and source over one pooled connection.
///
/// Table transactions are explicit `BEGIN`/`COMMIT` blocks and every row
/// insert inside one runs under a savepoint, so a rejected row does not
/// poison the rest of the table.
#[derive(Debug)]
pub struct PgDatabase {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

impl PgDatabase {
    pub async fn acquire(pool: &PgPool) -> Result<Self> {
        let conn = pool.acquire().await.map_err(db_error)?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    fn execute<'a>(
        &'a mut self,
        sql: &'a str,
    ) -> impl std::future::Future<Output = Result<u64>> + Send + 'a {
        async move {
            let done = sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql(sql))
                .await
                .map_err(db_error)?;
            Ok(done.rows_affected())
        }
    }

    fn try_insert<'a>(
        &'a mut self,
        table: &'a TableDescriptor,
        row: &'a Row,
    ) -> impl std::future::Future<Output = Result<Row>> + Send + 'a {
        async move {
            let columns: Vec<&str> = row.keys().map(String::as_str).collect();
            let sql = queries::insert_statement(table, &columns);
            let mut query = sqlx::query(&sql);
            for value in row.values() {
                query = query.bind(mapper::to_sql_text(value));
            }
            let stored = query.fetch_one(&mut *self.conn).await.map_err(|err| match err {
                sqlx::Error::Database(db_err) => PopulateError::Insert {
                    table: table.name.clone(),
                    message: db_err.to_string(),
                },
                other => db_error(other),
            })?;

            let mut result = Row::new();
            for column in &table.columns {
                let text: Option<String> = stored.try_get(column.name.as_str()).map_err(db_error)?;
                result.insert(
                    column.name.clone(),
                    mapper::from_sql_text(&column.column_type, text),
                );
            }
            Ok(result)
        }
    }
}

#[async_trait]
impl Destination for PgDatabase {
    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(PopulateError::Database(
                "transaction already in progress".to_string(),
            ));
        }
        self.execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.execute("ROLLBACK").await?;
        Ok(())
    }

    async fn insert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<Row> {
        if let Some(unknown) = row.keys().find(|column| table.column(column).is_none()) {
            return Err(PopulateError::Insert {
                table: table.name.clone(),
                message: format!("column \"{unknown}\" does not exist"),
            });
        }
        if !self.in_transaction {
            return self.try_insert(table, row).await;
        }

        self.execute(&format!("SAVEPOINT {}", queries::SAVEPOINT)).await?;
        match self.try_insert(table, row).await {
            Ok(stored) => {
                self.execute(&format!("RELEASE SAVEPOINT {}", queries::SAVEPOINT))
                    .await?;
                Ok(stored)
            }
            Err(err) => {
                self.execute(&format!("ROLLBACK TO SAVEPOINT {}", queries::SAVEPOINT))
                    .await?;
                Err(err)
            }
        }
    }

    async fn fetch_column_values(
        &mut self,
        table: &TableDescriptor,
        columns: &[String],
    ) -> Result<Vec<Vec<Value>>> {
        let types = columns
            .iter()
            .map(|column| {
                table
                    .column(column)
                    .map(|descriptor| descriptor.column_type.clone())
                    .ok_or_else(|| {
                        PopulateError::InvalidPlan(format!(
                            "unknown column '{}.{column}'",
                            table.name
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        let sql = queries::select_columns(table, columns);
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(db_error)?;
        debug!(table = %table.name, columns = ?columns, rows = rows.len(), "existing values fetched");

        rows.iter()
            .map(|row| {
                types
                    .iter()
                    .enumerate()
                    .map(|(idx, column_type)| {
                        let text: Option<String> = row.try_get(idx).map_err(db_error)?;
                        Ok(mapper::from_sql_text(column_type, text))
                    })
                    .collect()
            })
            .collect()
    }

    async fn random_value(
        &mut self,
        table: &TableDescriptor,
        column: &str,
    ) -> Result<Option<Value>> {
        let column_type = table
            .column(column)
            .map(|descriptor| descriptor.column_type.clone())
            .ok_or_else(|| {
                PopulateError::InvalidPlan(format!("unknown column '{}.{column}'", table.name))
            })?;
        let sql = queries::random_value(table, column);
        let row = sqlx::query(&sql)
            .fetch_optional(&mut *self.conn)
            .await
            .map_err(db_error)?;
        row.map(|row| {
            let text: Option<String> = row.try_get(0).map_err(db_error)?;
            Ok(mapper::from_sql_text(&column_type, text))
        })
        .transpose()
    }

    async fn delete_all(&mut self, table: &TableDescriptor) -> Result<u64> {
        self.execute(&queries::delete_all(table)).await
    }
}

#[async_trait]
impl Source for PgDatabase {
    async fn fetch_rows(&mut self, query: &str) -> Result<Vec<Row>> {
        let sql = queries::rows_as_json(query);
        let rows = sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(db_error)?;
        rows.into_iter()
            .map(|text| {
                let json: serde_json::Value = serde_json::from_str(&text)?;
                mapper::row_from_json(json).ok_or_else(|| {
                    PopulateError::Database(format!("query returned a non-object row: {text}"))
                })
            })
            .collect()
    }
}
