use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Options for the population engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulateOptions {
    /// Number of complete population cycles.
    pub num_passes: u32,
    /// Master seed every table and story stream is derived from.
    pub seed: u64,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        Self {
            num_passes: 1,
            seed: 0,
        }
    }
}

/// Rows written to one table during one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub pass: u32,
    pub table: String,
    pub story_rows: u64,
    pub direct_rows: u64,
    pub skipped: u64,
}

impl TableReport {
    pub fn new(pass: u32, table: &str) -> Self {
        Self {
            pass,
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn inserted(&self) -> u64 {
        self.story_rows + self.direct_rows
    }
}

/// Structured warning raised during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationIssue {
    pub code: String,
    pub message: String,
    pub pass: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<String>,
}

/// Report for a population run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationReport {
    pub run_id: String,
    pub passes_completed: u32,
    pub tables: Vec<TableReport>,
    pub stories_completed: u64,
    pub stories_abandoned: u64,
    pub stories_stalled: u64,
    pub warnings_by_code: BTreeMap<String, u64>,
    pub warnings: Vec<PopulationIssue>,
    /// Error that aborted the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl PopulationReport {
    pub fn new(run_id: String) -> Self {
        Self {
            run_id,
            passes_completed: 0,
            tables: Vec::new(),
            stories_completed: 0,
            stories_abandoned: 0,
            stories_stalled: 0,
            warnings_by_code: BTreeMap::new(),
            warnings: Vec::new(),
            failure: None,
        }
    }

    pub fn record_warning(&mut self, issue: PopulationIssue) {
        *self.warnings_by_code.entry(issue.code.clone()).or_insert(0) += 1;
        self.warnings.push(issue);
    }

    pub fn rows_inserted(&self) -> u64 {
        self.tables.iter().map(TableReport::inserted).sum()
    }

    pub fn rows_skipped(&self) -> u64 {
        self.tables.iter().map(|table| table.skipped).sum()
    }

    /// Table reports of one pass, in processing order.
    pub fn pass(&self, pass: u32) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(move |table| table.pass == pass)
    }
}
