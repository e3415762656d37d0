use relsynth_core::{TableDescriptor, quote_ident};

pub const SAVEPOINT: &str = "relsynth_row";

/// Select list reading every column as text, keeping the column name.
fn text_columns<'a>(columns: impl Iterator<Item = &'a str>) -> String {
    columns
        .map(|column| {
            let quoted = quote_ident(column);
            format!("{quoted}::text AS {quoted}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT ... RETURNING` for the given columns, each bound as text and cast
/// to its declared type.
pub fn insert_statement(table: &TableDescriptor, columns: &[&str]) -> String {
    let returning = text_columns(table.columns.iter().map(|column| column.name.as_str()));
    if columns.is_empty() {
        return format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {returning}",
            table.qualified_name()
        );
    }
    let names = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let cast = table
                .column(column)
                .map(|descriptor| descriptor.column_type.sql_type())
                .unwrap_or("text");
            format!("${}::{cast}", idx + 1)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({names}) VALUES ({placeholders}) RETURNING {returning}",
        table.qualified_name()
    )
}

pub fn select_columns(table: &TableDescriptor, columns: &[String]) -> String {
    let list = columns
        .iter()
        .map(|column| format!("{}::text", quote_ident(column)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {list} FROM {}", table.qualified_name())
}

pub fn random_value(table: &TableDescriptor, column: &str) -> String {
    format!(
        "SELECT {}::text FROM {} ORDER BY random() LIMIT 1",
        quote_ident(column),
        table.qualified_name()
    )
}

pub fn delete_all(table: &TableDescriptor) -> String {
    format!("DELETE FROM {}", table.qualified_name())
}

/// Wrap an arbitrary query so every result row arrives as one JSON object.
pub fn rows_as_json(query: &str) -> String {
    let query = query.trim().trim_end_matches(';');
    format!("SELECT row_to_json(q)::text FROM ({query}) AS q")
}
