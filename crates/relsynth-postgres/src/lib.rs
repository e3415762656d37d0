//! Postgres source and destination for relsynth.

pub mod options;
pub mod postgres;

pub use options::ConnectOptions;
pub use postgres::{PgDatabase, connect_pool};
