//! Population engine for relsynth.
//!
//! Fills a destination database with synthetic rows in foreign-key order,
//! interleaving scripted stories with per-table generators, sampling column
//! values from source statistics and keeping unique constraints satisfied.

pub mod adapter;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod memory;
pub mod model;
pub mod planner;
pub mod rules;
pub mod sampler;
pub mod stats;
pub mod story;
pub mod unique;

pub use adapter::{
    FnGenerator, GenerationContext, GeneratorRegistry, RowGenerator, from_fn, generate_row,
    generate_row_with,
};
pub use config::{PopulateConfig, TableConfig};
pub use db::{Destination, Source};
pub use engine::{Populator, remove_data};
pub use errors::{PopulateError, Result};
pub use memory::InMemoryDatabase;
pub use model::{PopulateOptions, PopulationIssue, PopulationReport, TableReport};
pub use planner::{PlannedTable, PopulationPlan, build_plan};
pub use rules::{ColumnRule, FakeKind, RuleGenerator};
pub use sampler::{Sample, ValueColumns, sample_grouped};
pub use stats::{SourceStats, StatQuery, collect_stats};
pub use story::{
    Override, ScriptedStory, Story, StoryContext, StoryFactory, StoryInstance, StoryRequest,
    StorySpec, StoryStep,
};
pub use unique::{Candidate, DEFAULT_MAX_TRIES, UniqueGenerator};
