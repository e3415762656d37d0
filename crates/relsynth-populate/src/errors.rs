use std::collections::BTreeMap;

use thiserror::Error;

use relsynth_core::Value;

/// Errors emitted by the population engine.
#[derive(Debug, Error)]
pub enum PopulateError {
    /// Grouped sampling found no rows once the filter was applied.
    #[error("empty result sampling '{stat}' with filter {filter:?}")]
    EmptyResult {
        stat: String,
        filter: BTreeMap<String, Value>,
    },
    /// A uniqueness enforcer ran out of attempts.
    #[error(
        "failed to generate a value satisfying unique constraint on {columns:?} in table '{table}' after {attempts} attempts"
    )]
    UniquenessExhausted {
        table: String,
        columns: Vec<String>,
        attempts: u32,
    },
    /// The destination rejected a single row.
    #[error("insert into '{table}' rejected: {message}")]
    Insert { table: String, message: String },
    /// A non-nullable foreign key had no parent row to point at.
    #[error("no rows in '{parent}' to reference from '{table}.{column}'")]
    MissingParent {
        table: String,
        column: String,
        parent: String,
    },
    /// A generator produced a column the table does not have.
    #[error("generator for '{table}' produced unknown column '{column}'")]
    UnknownColumn { table: String, column: String },
    /// A column generator could not produce a value.
    #[error("generator error in '{table}.{column}': {message}")]
    Generator {
        table: String,
        column: String,
        message: String,
    },
    /// A story step function failed.
    #[error("story '{story}' failed: {message}")]
    StoryFault { story: String, message: String },
    /// A fatal error aborted a population pass.
    #[error("pass {pass} aborted while populating '{table}': {source}")]
    PassAborted {
        pass: u32,
        table: String,
        #[source]
        source: Box<PopulateError>,
    },
    #[error("database error: {0}")]
    Database(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Core(#[from] relsynth_core::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PopulateError {
    /// Whether the failure only costs the row being generated.
    ///
    /// Row-level failures are logged and skipped; everything else aborts the pass.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            PopulateError::EmptyResult { .. }
                | PopulateError::Insert { .. }
                | PopulateError::MissingParent { .. }
                | PopulateError::UnknownColumn { .. }
                | PopulateError::Generator { .. }
        )
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, PopulateError>;
