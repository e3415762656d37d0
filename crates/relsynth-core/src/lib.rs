//! Core contracts and helpers for relsynth.
//!
//! This crate defines the table descriptors, the tagged value model, and the
//! foreign-key ordering shared by the population engine and its adapters.

pub mod constraints;
pub mod error;
pub mod graph;
pub mod redaction;
pub mod schema;
pub mod types;
pub mod validation;
pub mod value;

pub use constraints::{ForeignKeyTarget, UniqueGroup};
pub use error::{Error, Result};
pub use graph::{
    build_fk_graph_report, deletion_order, insertion_order, FkGraphReport, FkGraphSummary,
};
pub use redaction::redact_connection_string;
pub use schema::{ColumnDescriptor, MetaData, TableDescriptor, quote_ident};
pub use types::ColumnType;
pub use validation::validate_metadata;
pub use value::{key_tuple, KeyTuple, Row, Value, ValueKey};
