use std::env;

use anyhow::{Context, Result};
use relsynth_core::{ColumnDescriptor, ColumnType, MetaData, TableDescriptor, Value};
use relsynth_populate::{
    Destination, GeneratorRegistry, PopulateConfig, Populator, SourceStats, Source, build_plan,
    remove_data,
};
use relsynth_postgres::{ConnectOptions, PgDatabase, connect_pool};
use sqlx::PgPool;

const SCHEMA: &[&str] = &[
    "DROP TABLE IF EXISTS relsynth_it_order",
    "DROP TABLE IF EXISTS relsynth_it_customer",
    "CREATE TABLE relsynth_it_customer (
        customer_id serial PRIMARY KEY,
        email text NOT NULL UNIQUE,
        joined date
    )",
    "CREATE TABLE relsynth_it_order (
        order_id serial PRIMARY KEY,
        customer_id integer NOT NULL REFERENCES relsynth_it_customer (customer_id),
        total numeric(10, 2)
    )",
];

fn database_url() -> Option<String> {
    env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok()
}

async fn reset_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("executing {statement}"))?;
    }
    Ok(())
}

fn metadata() -> Result<MetaData> {
    Ok(MetaData {
        tables: vec![
            TableDescriptor::new(
                "relsynth_it_order",
                vec![
                    ColumnDescriptor::new("order_id", ColumnType::Integer).primary(),
                    ColumnDescriptor::new("customer_id", ColumnType::Integer)
                        .references("relsynth_it_customer.customer_id".parse()?)
                        .not_null(),
                    ColumnDescriptor::new("total", ColumnType::Numeric),
                ],
            ),
            TableDescriptor::new(
                "relsynth_it_customer",
                vec![
                    ColumnDescriptor::new("customer_id", ColumnType::Integer).primary(),
                    ColumnDescriptor::new("email", ColumnType::Text).not_null(),
                    ColumnDescriptor::new("joined", ColumnType::Date),
                ],
            )
            .with_unique("relsynth_it_customer_email_key", &["email"]),
        ],
    })
}

const CONFIG: &str = r#"
seed = 7
num_passes = 2

[tables.relsynth_it_customer]
num_rows_per_pass = 4
[tables.relsynth_it_customer.columns.email]
rule = "fake"
kind = "email"
[tables.relsynth_it_customer.columns.joined]
rule = "date_range"
min = "2020-01-01"
max = "2020-12-31"

[tables.relsynth_it_order]
num_rows_per_pass = 6
[tables.relsynth_it_order.columns.total]
rule = "float_range"
min = 1.0
max = 500.0
"#;

#[tokio::test]
async fn populates_and_removes_rows_in_postgres() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL to run");
        return Ok(());
    };
    let pool = connect_pool(&url, &ConnectOptions::default()).await?;
    reset_schema(&pool).await?;

    let metadata = metadata()?;
    let config: PopulateConfig = toml::from_str(CONFIG)?;
    let stats = SourceStats::new();
    let plan = build_plan(&metadata, &config, GeneratorRegistry::new(), &stats)?;
    let mut populator = Populator::new(config.options(), plan, stats);
    let mut dst = PgDatabase::acquire(&pool).await?;

    let report = populator.run(&mut dst).await?;
    assert_eq!(report.passes_completed, 2);
    assert_eq!(report.rows_inserted(), 20);

    let customer = metadata
        .table("relsynth_it_customer")
        .context("customer table")?;
    let emails = dst
        .fetch_column_values(customer, &["email".to_string()])
        .await?;
    assert_eq!(emails.len(), 8);

    let mut src = PgDatabase::acquire(&pool).await?;
    let rows = src
        .fetch_rows("SELECT count(*)::int AS orders FROM relsynth_it_order")
        .await?;
    assert_eq!(rows[0]["orders"], Value::Int(12));

    let removed = remove_data(&mut dst, &metadata, &config).await?;
    assert_eq!(
        removed,
        vec![
            ("relsynth_it_order".to_string(), 12),
            ("relsynth_it_customer".to_string(), 8)
        ]
    );
    Ok(())
}

#[tokio::test]
async fn rejected_rows_leave_the_transaction_usable() -> Result<()> {
    let Some(url) = database_url() else {
        eprintln!("skipping: set TEST_DATABASE_URL or DATABASE_URL to run");
        return Ok(());
    };
    let pool = connect_pool(&url, &ConnectOptions::default()).await?;
    reset_schema(&pool).await?;

    let metadata = metadata()?;
    let order = metadata.table("relsynth_it_order").context("order table")?;
    let customer = metadata
        .table("relsynth_it_customer")
        .context("customer table")?;
    let mut dst = PgDatabase::acquire(&pool).await?;

    dst.begin().await?;
    let orphan = [("customer_id".to_string(), Value::Int(999))]
        .into_iter()
        .collect();
    let err = dst
        .insert_row(order, &orphan)
        .await
        .expect_err("orphan order must be rejected");
    assert!(err.is_row_level(), "unexpected error {err}");

    let fine = [("email".to_string(), Value::from("a@example.com"))]
        .into_iter()
        .collect();
    let stored = dst.insert_row(customer, &fine).await?;
    dst.commit().await?;

    assert!(matches!(stored["customer_id"], Value::Int(_)));
    assert_eq!(stored["joined"], Value::Null);
    Ok(())
}
