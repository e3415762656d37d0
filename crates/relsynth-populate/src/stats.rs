//! Source statistics: computed once per run, then shared read-only.

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use relsynth_core::{Row, Value};

use crate::db::Source;
use crate::errors::{PopulateError, Result};
use crate::sampler::{Sample, ValueColumns, sample_grouped};

/// A named grouping query run against the source database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatQuery {
    pub name: String,
    pub query: String,
}

/// Aggregate query results keyed by statistic name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceStats {
    stats: BTreeMap<String, Vec<Row>>,
}

impl SourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, rows: Vec<Row>) {
        self.stats.insert(name.into(), rows);
    }

    pub fn get(&self, name: &str) -> Option<&[Row]> {
        self.stats.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Weighted draw from the statistic `name`; see [`sample_grouped`].
    pub fn sample<R: Rng + ?Sized>(
        &self,
        name: &str,
        weights_column: &str,
        filter: &BTreeMap<String, Value>,
        value_columns: &ValueColumns,
        rng: &mut R,
    ) -> Result<Sample> {
        let rows = self.get(name).ok_or_else(|| {
            PopulateError::InvalidConfig(format!("unknown source statistic '{name}'"))
        })?;
        sample_grouped(name, rows, weights_column, filter, value_columns, rng)
    }
}

/// Run every statistic query once against `source`.
pub async fn collect_stats(source: &mut dyn Source, queries: &[StatQuery]) -> Result<SourceStats> {
    let mut stats = SourceStats::new();
    for query in queries {
        if stats.get(&query.name).is_some() {
            return Err(PopulateError::InvalidConfig(format!(
                "duplicate source statistic '{}'",
                query.name
            )));
        }
        let rows = source.fetch_rows(&query.query).await?;
        info!(stat = %query.name, rows = rows.len(), "source statistic collected");
        stats.insert(query.name.clone(), rows);
    }
    Ok(stats)
}
