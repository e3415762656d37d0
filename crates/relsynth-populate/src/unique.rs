//! Retry-until-distinct wrapper for values under a uniqueness constraint.

use std::collections::HashSet;

use tracing::debug;

use relsynth_core::{KeyTuple, TableDescriptor, Value};

use crate::db::Destination;
use crate::errors::{PopulateError, Result};

/// Attempts allowed after the first draw before giving up.
pub const DEFAULT_MAX_TRIES: u32 = 100;

/// A generated value that can be projected onto a uniqueness key.
pub trait Candidate {
    /// Key formed from the positions in `indices`, `None` if a position is missing.
    fn project(&self, indices: &[usize]) -> Option<KeyTuple>;
}

impl Candidate for Value {
    fn project(&self, indices: &[usize]) -> Option<KeyTuple> {
        match indices {
            [] | [0] => Some(vec![self.key()]),
            _ => None,
        }
    }
}

impl Candidate for Vec<Value> {
    fn project(&self, indices: &[usize]) -> Option<KeyTuple> {
        indices
            .iter()
            .map(|idx| self.get(*idx).map(Value::key))
            .collect()
    }
}

/// Enforces one uniqueness constraint of one table.
///
/// The key set is loaded from the destination on first use and then only
/// grows, so it carries over between passes of the same run.
#[derive(Debug)]
pub struct UniqueGenerator {
    table: TableDescriptor,
    columns: Vec<String>,
    max_tries: u32,
    existing: HashSet<KeyTuple>,
    loaded: bool,
}

impl UniqueGenerator {
    pub fn new(table: &TableDescriptor, columns: Vec<String>, max_tries: u32) -> Self {
        Self {
            table: table.clone(),
            columns,
            max_tries,
            existing: HashSet::new(),
            loaded: false,
        }
    }

    pub fn table(&self) -> &str {
        &self.table.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.existing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.existing.is_empty()
    }

    pub fn contains(&self, key: &KeyTuple) -> bool {
        self.existing.contains(key)
    }

    /// Add known keys without consulting the destination; later loads are skipped.
    pub fn seed(&mut self, keys: impl IntoIterator<Item = KeyTuple>) {
        self.existing.extend(keys);
        self.loaded = true;
    }

    /// Fetch the constrained columns from the destination, once per instance.
    pub async fn load(&mut self, dst: &mut dyn Destination) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let rows = dst.fetch_column_values(&self.table, &self.columns).await?;
        let count = rows.len();
        self.existing.extend(
            rows.into_iter()
                .map(|values| values.iter().map(Value::key).collect::<KeyTuple>()),
        );
        self.loaded = true;
        debug!(
            table = %self.table.name,
            columns = ?self.columns,
            existing = count,
            "unique keys loaded"
        );
        Ok(())
    }

    /// Load existing keys if needed, then draw until a candidate is unseen.
    pub async fn generate<T, F>(
        &mut self,
        dst: &mut dyn Destination,
        indices: &[usize],
        inner: F,
    ) -> Result<T>
    where
        T: Candidate + Send,
        F: FnMut() -> Result<T> + Send,
    {
        self.load(dst).await?;
        self.try_generate(indices, inner)
    }

    /// Draw from `inner` against the current key set.
    ///
    /// Makes one initial draw plus up to `max_tries` retries. The accepted
    /// candidate is recorded and returned unchanged.
    pub fn try_generate<T, F>(&mut self, indices: &[usize], mut inner: F) -> Result<T>
    where
        T: Candidate,
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_tries.saturating_add(1);
        for _ in 0..attempts {
            let candidate = inner()?;
            let key = candidate.project(indices).ok_or_else(|| {
                PopulateError::InvalidPlan(format!(
                    "output indices {indices:?} do not fit generated value for {:?} in '{}'",
                    self.columns, self.table.name
                ))
            })?;
            if self.existing.insert(key) {
                return Ok(candidate);
            }
        }
        Err(PopulateError::UniquenessExhausted {
            table: self.table.name.clone(),
            columns: self.columns.clone(),
            attempts,
        })
    }
}
