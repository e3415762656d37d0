use thiserror::Error;

/// Core error type shared across relsynth crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The table descriptors violate internal invariants.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// A foreign key target could not be parsed.
    #[error("invalid foreign key target '{0}': expected schema.table.column")]
    InvalidForeignKey(String),
}

/// Convenience alias for results returned by relsynth crates.
pub type Result<T> = std::result::Result<T, Error>;
