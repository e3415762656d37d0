use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use relsynth_core::MetaData;

use crate::errors::{PopulateError, Result};
use crate::model::PopulateOptions;
use crate::rules::ColumnRule;
use crate::stats::StatQuery;
use crate::unique::DEFAULT_MAX_TRIES;

/// Run configuration, read from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PopulateConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_passes")]
    pub num_passes: u32,
    /// Retries each uniqueness enforcer makes after its first draw; fixed
    /// into the rule generators when the plan is built.
    #[serde(default = "default_max_unique_tries")]
    pub max_unique_tries: u32,
    #[serde(default)]
    pub src_stats: Vec<StatQuery>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
}

/// Per-table settings under `[tables.<name>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    #[serde(default = "default_rows_per_pass")]
    pub num_rows_per_pass: u32,
    /// Leave the table alone entirely.
    #[serde(default)]
    pub ignore: bool,
    /// Loaded from a fixed dataset; never generated and never deleted.
    #[serde(default)]
    pub vocabulary_table: bool,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnRule>,
}

fn default_passes() -> u32 {
    1
}

fn default_max_unique_tries() -> u32 {
    DEFAULT_MAX_TRIES
}

fn default_rows_per_pass() -> u32 {
    1
}

impl Default for PopulateConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_passes: default_passes(),
            max_unique_tries: default_max_unique_tries(),
            src_stats: Vec::new(),
            tables: BTreeMap::new(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            num_rows_per_pass: default_rows_per_pass(),
            ignore: false,
            vocabulary_table: false,
            columns: BTreeMap::new(),
        }
    }
}

impl PopulateConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.get(name)
    }

    /// Ignored and vocabulary tables are neither generated nor deleted.
    pub fn is_skipped(&self, name: &str) -> bool {
        self.table(name)
            .is_some_and(|table| table.ignore || table.vocabulary_table)
    }

    pub fn rows_per_pass(&self, name: &str) -> u32 {
        self.table(name)
            .map_or_else(default_rows_per_pass, |table| table.num_rows_per_pass)
    }

    pub fn options(&self) -> PopulateOptions {
        PopulateOptions {
            num_passes: self.num_passes,
            seed: self.seed,
        }
    }

    /// Every configured table and column must exist in `metadata`.
    pub fn validate_against(&self, metadata: &MetaData) -> Result<()> {
        for (name, table_config) in &self.tables {
            let table = metadata.table(name).ok_or_else(|| {
                PopulateError::InvalidConfig(format!("config names unknown table '{name}'"))
            })?;
            for key in table_config.columns.keys() {
                for column in key.split(',').map(str::trim) {
                    if table.column(column).is_none() {
                        return Err(PopulateError::InvalidConfig(format!(
                            "config names unknown column '{name}.{column}'"
                        )));
                    }
                }
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for query in &self.src_stats {
            if !seen.insert(query.name.as_str()) {
                return Err(PopulateError::InvalidConfig(format!(
                    "duplicate source statistic '{}'",
                    query.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use relsynth_core::{ColumnDescriptor, ColumnType, TableDescriptor};

    use super::*;

    const SAMPLE: &str = r#"
seed = 42
num_passes = 3

[[src_stats]]
name = "person_sex"
query = "SELECT count(*) AS num, sex FROM person GROUP BY sex"

[tables.person]
num_rows_per_pass = 10

[tables.person.columns.sex]
rule = "sample_stat"
stat = "person_sex"
weights_column = "num"

[tables.concept]
vocabulary_table = true
"#;

    #[test]
    fn parses_sample_config() {
        let config: PopulateConfig = toml::from_str(SAMPLE).expect("config");
        assert_eq!(config.seed, 42);
        assert_eq!(config.num_passes, 3);
        assert_eq!(config.max_unique_tries, DEFAULT_MAX_TRIES);
        assert_eq!(config.src_stats.len(), 1);
        assert_eq!(config.rows_per_pass("person"), 10);
        assert_eq!(config.rows_per_pass("visit"), 1);
        assert!(config.is_skipped("concept"));
        assert!(!config.is_skipped("person"));
        assert!(matches!(
            config.table("person").unwrap().columns["sex"],
            ColumnRule::SampleStat { .. }
        ));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: PopulateConfig = toml::from_str("").expect("config");
        assert_eq!(config, PopulateConfig::default());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<PopulateConfig>("passes = 2").is_err());
    }

    #[test]
    fn validates_names_against_metadata() {
        let metadata = MetaData {
            tables: vec![TableDescriptor::new(
                "person",
                vec![ColumnDescriptor::new("sex", ColumnType::Text)],
            )],
        };
        let mut config: PopulateConfig = toml::from_str(SAMPLE).expect("config");
        config.tables.remove("concept");
        config.validate_against(&metadata).expect("valid");

        config
            .tables
            .get_mut("person")
            .unwrap()
            .columns
            .insert("height".to_string(), ColumnRule::Null);
        assert!(config.validate_against(&metadata).is_err());
    }
}
