//! Stories: scripted sequences of related inserts across tables.
//!
//! A story is a step function. Each step receives the fully stored row of
//! the previous request (nothing on the first step) and returns the next
//! request, or `None` once the story is over.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use tracing::debug;

use relsynth_core::{Row, Value};

use crate::adapter::{GenerationContext, RowGenerator, generate_row_with};
use crate::errors::{PopulateError, Result};
use crate::stats::SourceStats;

/// One override value, possibly computed only when the row is built.
pub enum Override {
    Value(Value),
    Deferred(Box<dyn FnOnce() -> Value + Send>),
}

impl Override {
    pub fn deferred(compute: impl FnOnce() -> Value + Send + 'static) -> Self {
        Override::Deferred(Box::new(compute))
    }

    pub fn evaluate(self) -> Value {
        match self {
            Override::Value(value) => value,
            Override::Deferred(compute) => compute(),
        }
    }
}

impl From<Value> for Override {
    fn from(value: Value) -> Self {
        Override::Value(value)
    }
}

impl fmt::Debug for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Override::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Override::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

type DeferredRow = Box<dyn FnOnce() -> Row + Send>;

/// A row a story wants inserted into `table`.
///
/// Overrides replace the values the table's generator would produce. A
/// deferred row is computed first, then single-column overrides are applied
/// over it.
pub struct StoryRequest {
    table: String,
    deferred: Option<DeferredRow>,
    overrides: BTreeMap<String, Override>,
}

impl StoryRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            deferred: None,
            overrides: BTreeMap::new(),
        }
    }

    /// A request whose overrides are produced by `compute` at insert time.
    pub fn deferred(table: impl Into<String>, compute: impl FnOnce() -> Row + Send + 'static) -> Self {
        Self {
            deferred: Some(Box::new(compute)),
            ..Self::new(table)
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides
            .insert(column.into(), Override::Value(value.into()));
        self
    }

    pub fn set_with(
        mut self,
        column: impl Into<String>,
        compute: impl FnOnce() -> Value + Send + 'static,
    ) -> Self {
        self.overrides
            .insert(column.into(), Override::deferred(compute));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Evaluate every deferred part into the final override row.
    pub fn into_overrides(self) -> Row {
        let mut row = self.deferred.map(|compute| compute()).unwrap_or_default();
        row.extend(
            self.overrides
                .into_iter()
                .map(|(column, value)| (column, value.evaluate())),
        );
        row
    }
}

impl fmt::Debug for StoryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryRequest")
            .field("table", &self.table)
            .field("deferred", &self.deferred.is_some())
            .field("overrides", &self.overrides)
            .finish()
    }
}

/// A resumable producer of insert requests.
pub trait Story: Send {
    /// Advance with the stored row of the previous request.
    fn step(&mut self, received: Option<&Row>) -> Result<Option<StoryRequest>>;
}

/// What a factory knows when creating one story instance.
#[derive(Debug, Clone, Copy)]
pub struct StoryContext<'a> {
    pub pass: u32,
    /// Position of this instance among the story's instances in the pass.
    pub ordinal: u32,
    /// Seed derived from the run seed, the story name, the pass and the ordinal.
    pub seed: u64,
    pub stats: &'a SourceStats,
}

/// Creates fresh story instances.
pub trait StoryFactory: Send + Sync {
    fn create(&self, ctx: &StoryContext<'_>) -> Result<Box<dyn Story>>;
}

impl<F> StoryFactory for F
where
    F: Fn(&StoryContext<'_>) -> Result<Box<dyn Story>> + Send + Sync,
{
    fn create(&self, ctx: &StoryContext<'_>) -> Result<Box<dyn Story>> {
        self(ctx)
    }
}

/// A named story and how many instances each pass starts.
pub struct StorySpec {
    pub name: String,
    pub per_pass: u32,
    pub factory: Box<dyn StoryFactory>,
}

impl StorySpec {
    pub fn new(name: impl Into<String>, per_pass: u32, factory: impl StoryFactory + 'static) -> Self {
        Self {
            name: name.into(),
            per_pass,
            factory: Box::new(factory),
        }
    }
}

impl fmt::Debug for StorySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorySpec")
            .field("name", &self.name)
            .field("per_pass", &self.per_pass)
            .finish()
    }
}

type Step = Box<dyn FnOnce(&[Row]) -> Result<StoryRequest> + Send>;

/// A story made of an ordered list of steps.
///
/// Every step sees all rows stored so far by this story, oldest first.
#[derive(Default)]
pub struct ScriptedStory {
    steps: VecDeque<Step>,
    rows: Vec<Row>,
}

impl ScriptedStory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(
        mut self,
        step: impl FnOnce(&[Row]) -> Result<StoryRequest> + Send + 'static,
    ) -> Self {
        self.steps.push_back(Box::new(step));
        self
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

impl Story for ScriptedStory {
    fn step(&mut self, received: Option<&Row>) -> Result<Option<StoryRequest>> {
        if let Some(row) = received {
            self.rows.push(row.clone());
        }
        match self.steps.pop_front() {
            Some(step) => step(&self.rows).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Debug)]
enum StoryState {
    NotStarted,
    Suspended(StoryRequest),
    Completed,
    Failed,
}

/// Result of executing one pending request.
#[derive(Debug)]
pub enum StoryStep {
    /// The row as stored, including server-assigned values.
    Inserted(Row),
    /// The row could not be stored; the story is dropped for this pass.
    Abandoned(PopulateError),
}

/// One running story and its position in the request/resume cycle.
pub struct StoryInstance {
    name: String,
    ordinal: u32,
    story: Box<dyn Story>,
    state: StoryState,
    rows_inserted: u32,
}

impl StoryInstance {
    pub fn new(name: impl Into<String>, ordinal: u32, story: Box<dyn Story>) -> Self {
        Self {
            name: name.into(),
            ordinal,
            story,
            state: StoryState::NotStarted,
            rows_inserted: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn rows_inserted(&self) -> u32 {
        self.rows_inserted
    }

    /// Table the next request targets, if the story is waiting on one.
    pub fn pending_table(&self) -> Option<&str> {
        match &self.state {
            StoryState::Suspended(request) => Some(request.table()),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, StoryState::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, StoryState::Failed)
    }

    /// Run the first step, which receives no row.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            StoryState::NotStarted => self.resume(None),
            _ => Err(PopulateError::InvalidPlan(format!(
                "story '{}' #{} started twice",
                self.name, self.ordinal
            ))),
        }
    }

    fn resume(&mut self, received: Option<&Row>) -> Result<()> {
        match self.story.step(received) {
            Ok(Some(request)) => {
                debug!(
                    story = %self.name,
                    ordinal = self.ordinal,
                    table = %request.table(),
                    "story yielded"
                );
                self.state = StoryState::Suspended(request);
                Ok(())
            }
            Ok(None) => {
                self.state = StoryState::Completed;
                Ok(())
            }
            Err(err) => {
                self.state = StoryState::Failed;
                Err(match err {
                    PopulateError::StoryFault { .. } => err,
                    other => PopulateError::StoryFault {
                        story: self.name.clone(),
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// Insert the pending row into `ctx.table` and feed the stored row back.
    ///
    /// Row-level failures abandon the story and are returned as
    /// [`StoryStep::Abandoned`]; faults raised by the story itself and fatal
    /// generation errors are returned as `Err`.
    pub async fn insert_pending(
        &mut self,
        generator: &mut dyn RowGenerator,
        ctx: &mut GenerationContext<'_>,
    ) -> Result<StoryStep> {
        let request = match std::mem::replace(&mut self.state, StoryState::Failed) {
            StoryState::Suspended(request) if request.table() == ctx.table.name => request,
            other => {
                self.state = other;
                return Err(PopulateError::InvalidPlan(format!(
                    "story '{}' #{} has no request pending for '{}'",
                    self.name, self.ordinal, ctx.table.name
                )));
            }
        };

        let overrides = request.into_overrides();
        let mut row = match generate_row_with(generator, ctx, overrides).await {
            Ok(row) => row,
            Err(err) if err.is_row_level() => return Ok(StoryStep::Abandoned(err)),
            Err(err) => return Err(err),
        };
        match ctx.dst.insert_row(ctx.table, &row).await {
            Ok(stored) => row.extend(stored),
            Err(err) if err.is_row_level() => return Ok(StoryStep::Abandoned(err)),
            Err(err) => return Err(err),
        }
        self.rows_inserted += 1;

        self.resume(Some(&row))?;
        Ok(StoryStep::Inserted(row))
    }
}

impl fmt::Debug for StoryInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryInstance")
            .field("name", &self.name)
            .field("ordinal", &self.ordinal)
            .field("state", &self.state)
            .field("rows_inserted", &self.rows_inserted)
            .finish()
    }
}
