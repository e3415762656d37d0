use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

use relsynth_core::{MetaData, TableDescriptor, insertion_order, validate_metadata};

use crate::adapter::{GeneratorRegistry, RowGenerator};
use crate::config::PopulateConfig;
use crate::errors::{PopulateError, Result};
use crate::rules::RuleGenerator;
use crate::stats::SourceStats;

/// A table the engine fills, with the generator that supplies its rows.
pub struct PlannedTable {
    pub descriptor: TableDescriptor,
    pub rows_per_pass: u32,
    pub generator: Box<dyn RowGenerator>,
}

impl fmt::Debug for PlannedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedTable")
            .field("table", &self.descriptor.name)
            .field("rows_per_pass", &self.rows_per_pass)
            .finish()
    }
}

/// Generated tables in dependency order, plus every descriptor for parent lookups.
#[derive(Debug)]
pub struct PopulationPlan {
    pub tables: Vec<PlannedTable>,
    pub metadata: MetaData,
}

impl PopulationPlan {
    pub fn table_names(&self) -> Vec<&str> {
        self.tables
            .iter()
            .map(|table| table.descriptor.name.as_str())
            .collect()
    }

    pub fn position(&self, table: &str) -> Option<usize> {
        self.tables
            .iter()
            .position(|planned| planned.descriptor.name == table)
    }
}

/// Order the destination tables and attach a generator to each.
///
/// Tables registered in `registry` use that generator; every other table is
/// driven by its `[tables.<name>.columns]` rules. Ignored and vocabulary
/// tables are left out.
pub fn build_plan(
    metadata: &MetaData,
    config: &PopulateConfig,
    mut registry: GeneratorRegistry,
    stats: &SourceStats,
) -> Result<PopulationPlan> {
    validate_metadata(metadata)?;
    config.validate_against(metadata)?;
    if let Some(unknown) = registry.tables().find(|name| metadata.table(name).is_none()) {
        return Err(PopulateError::InvalidConfig(format!(
            "generator registered for unknown table '{unknown}'"
        )));
    }

    let mut tables = Vec::new();
    for idx in insertion_order(&metadata.tables)? {
        let descriptor = &metadata.tables[idx];
        let name = descriptor.name.as_str();
        if config.is_skipped(name) {
            debug!(table = %name, "table not generated");
            continue;
        }

        let rules = config
            .table(name)
            .map(|table| &table.columns)
            .filter(|columns| !columns.is_empty());
        let generator: Box<dyn RowGenerator> = match registry.take(name) {
            Some(custom) => {
                if rules.is_some() {
                    warn!(table = %name, "custom generator replaces configured column rules");
                }
                custom
            }
            None => {
                let empty = BTreeMap::new();
                let generator = RuleGenerator::new(
                    descriptor,
                    rules.unwrap_or(&empty),
                    config.max_unique_tries,
                )?;
                if let Some(missing) = generator.stats_used().find(|stat| stats.get(stat).is_none()) {
                    return Err(PopulateError::InvalidConfig(format!(
                        "table '{name}' samples unknown source statistic '{missing}'"
                    )));
                }
                Box::new(generator)
            }
        };

        tables.push(PlannedTable {
            descriptor: descriptor.clone(),
            rows_per_pass: config.rows_per_pass(name),
            generator,
        });
    }

    info!(
        tables = tables.len(),
        skipped = metadata.tables.len() - tables.len(),
        "population plan built"
    );

    Ok(PopulationPlan {
        tables,
        metadata: metadata.clone(),
    })
}
