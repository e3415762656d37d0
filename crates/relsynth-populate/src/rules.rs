//! Config-driven row generator built from per-column rules.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use fake::Fake;
use fake::faker::address::en::{CityName, CountryName};
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::{Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use rand::Rng;
use rand::distr::{Distribution, Uniform};
use rand::seq::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use relsynth_core::{Row, TableDescriptor, Value};

use crate::adapter::{GenerationContext, RowGenerator};
use crate::errors::{PopulateError, Result};
use crate::sampler::{Sample, ValueColumns};
use crate::stats::SourceStats;
use crate::unique::UniqueGenerator;

/// How one column (or a comma-separated group of columns) is filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ColumnRule {
    Constant {
        value: Value,
    },
    Null,
    IntRange {
        min: i64,
        max: i64,
    },
    FloatRange {
        min: f64,
        max: f64,
    },
    Bool {
        #[serde(default = "default_probability")]
        probability: f64,
    },
    Choice {
        values: Vec<Value>,
    },
    Uuid,
    /// Every `{n}` in the pattern becomes a random integer.
    TextPattern {
        pattern: String,
    },
    DateRange {
        min: NaiveDate,
        max: NaiveDate,
    },
    TimestampRange {
        min: NaiveDateTime,
        max: NaiveDateTime,
    },
    Fake {
        kind: FakeKind,
    },
    /// Weighted draw from a source statistic. Multi-column targets receive
    /// the statistic's columns in order; `value_columns` defaults to the
    /// target names.
    SampleStat {
        stat: String,
        weights_column: String,
        #[serde(default)]
        value_columns: Option<Vec<String>>,
        #[serde(default)]
        filter: BTreeMap<String, Value>,
    },
}

fn default_probability() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FakeKind {
    Name,
    FirstName,
    LastName,
    Email,
    City,
    Country,
    Company,
    Word,
    Sentence,
    Phone,
}

const PATTERN_RANGE: u32 = 1_000_000;

impl ColumnRule {
    /// Number of values one draw produces, `None` when any count is accepted.
    fn arity(&self) -> Option<usize> {
        match self {
            ColumnRule::SampleStat {
                value_columns: None,
                ..
            } => None,
            ColumnRule::SampleStat {
                value_columns: Some(columns),
                ..
            } => Some(columns.len()),
            _ => Some(1),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            ColumnRule::IntRange { min, max } if min > max => {
                Err(format!("int_range min {min} exceeds max {max}"))
            }
            ColumnRule::FloatRange { min, max } if !(min <= max) => {
                Err(format!("float_range min {min} exceeds max {max}"))
            }
            ColumnRule::FloatRange { min, max } if !(max - min).is_finite() => {
                Err(format!("float_range {min}..{max} is not a finite span"))
            }
            ColumnRule::Bool { probability } if !(0.0..=1.0).contains(probability) => {
                Err(format!("bool probability {probability} is outside 0..=1"))
            }
            ColumnRule::Choice { values } if values.is_empty() => {
                Err("choice needs at least one value".to_string())
            }
            ColumnRule::DateRange { min, max } if min > max => {
                Err(format!("date_range min {min} exceeds max {max}"))
            }
            ColumnRule::TimestampRange { min, max } if min > max => {
                Err(format!("timestamp_range min {min} exceeds max {max}"))
            }
            _ => Ok(()),
        }
    }

    /// Produce values for `targets`, in target order.
    pub fn draw(
        &self,
        targets: &[String],
        stats: &SourceStats,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<Value>> {
        let value = match self {
            ColumnRule::Constant { value } => value.clone(),
            ColumnRule::Null => Value::Null,
            ColumnRule::IntRange { min, max } => Value::Int(rng.random_range(*min..=*max)),
            ColumnRule::FloatRange { min, max } if min == max => Value::Float(*min),
            ColumnRule::FloatRange { min, max } => {
                let range = Uniform::new(*min, *max).map_err(|err| {
                    PopulateError::InvalidConfig(format!("float_range {min}..{max}: {err}"))
                })?;
                Value::Float(range.sample(rng))
            }
            ColumnRule::Bool { probability } => Value::Bool(rng.random_bool(*probability)),
            ColumnRule::Choice { values } => values.choose(rng).cloned().unwrap_or(Value::Null),
            ColumnRule::Uuid => {
                Value::Uuid(uuid::Builder::from_random_bytes(rng.random()).into_uuid().to_string())
            }
            ColumnRule::TextPattern { pattern } => Value::Text(fill_pattern(pattern, rng)),
            ColumnRule::DateRange { min, max } => {
                let days = (*max - *min).num_days();
                Value::Date(*min + TimeDelta::days(rng.random_range(0..=days)))
            }
            ColumnRule::TimestampRange { min, max } => {
                let seconds = (*max - *min).num_seconds();
                Value::Timestamp(*min + TimeDelta::seconds(rng.random_range(0..=seconds)))
            }
            ColumnRule::Fake { kind } => Value::Text(fake_text(*kind, rng)),
            ColumnRule::SampleStat {
                stat,
                weights_column,
                value_columns,
                filter,
            } => {
                let columns = value_columns.clone().unwrap_or_else(|| targets.to_vec());
                let projection = match columns.as_slice() {
                    [single] => ValueColumns::One(single.clone()),
                    _ => ValueColumns::Many(columns),
                };
                return stats
                    .sample(stat, weights_column, filter, &projection, rng)
                    .map(Sample::into_values);
            }
        };
        Ok(vec![value])
    }
}

fn fill_pattern(pattern: &str, rng: &mut ChaCha8Rng) -> String {
    let mut parts = pattern.split("{n}");
    let mut out = parts.next().unwrap_or_default().to_string();
    for part in parts {
        out.push_str(&rng.random_range(0..PATTERN_RANGE).to_string());
        out.push_str(part);
    }
    out
}

fn fake_text(kind: FakeKind, rng: &mut ChaCha8Rng) -> String {
    match kind {
        FakeKind::Name => Name().fake_with_rng(rng),
        FakeKind::FirstName => FirstName().fake_with_rng(rng),
        FakeKind::LastName => LastName().fake_with_rng(rng),
        FakeKind::Email => SafeEmail().fake_with_rng(rng),
        FakeKind::City => CityName().fake_with_rng(rng),
        FakeKind::Country => CountryName().fake_with_rng(rng),
        FakeKind::Company => CompanyName().fake_with_rng(rng),
        FakeKind::Word => Word().fake_with_rng(rng),
        FakeKind::Sentence => Sentence(3..8).fake_with_rng(rng),
        FakeKind::Phone => PhoneNumber().fake_with_rng(rng),
    }
}

#[derive(Debug)]
struct Slot {
    targets: Vec<String>,
    rule: ColumnRule,
}

impl Slot {
    fn draw(&self, table: &str, stats: &SourceStats, rng: &mut ChaCha8Rng) -> Result<Vec<Value>> {
        let values = self.rule.draw(&self.targets, stats, rng).map_err(|err| match err {
            PopulateError::InvalidConfig(message) => PopulateError::Generator {
                table: table.to_string(),
                column: self.targets.join(","),
                message,
            },
            other => other,
        })?;
        if values.len() != self.targets.len() {
            return Err(PopulateError::Generator {
                table: table.to_string(),
                column: self.targets.join(","),
                message: format!(
                    "rule produced {} values for {} columns",
                    values.len(),
                    self.targets.len()
                ),
            });
        }
        Ok(values)
    }
}

/// A uniqueness enforcer and the slots that are redrawn together under it.
#[derive(Debug)]
struct Enforced {
    unique: UniqueGenerator,
    slots: Vec<usize>,
    indices: Vec<usize>,
}

/// Row generator driven by `[tables.<name>.columns]` rules.
///
/// Unique groups whose columns are all covered by rules are enforced here;
/// the rest are left to the database.
#[derive(Debug)]
pub struct RuleGenerator {
    table: String,
    slots: Vec<Slot>,
    enforced: Vec<Enforced>,
}

impl RuleGenerator {
    /// Build from column rules keyed by column name or `"a,b"` column groups.
    pub fn new(
        table: &TableDescriptor,
        rules: &BTreeMap<String, ColumnRule>,
        max_unique_tries: u32,
    ) -> Result<Self> {
        let mut slots = Vec::new();
        let mut covered: BTreeMap<String, usize> = BTreeMap::new();
        for (key, rule) in rules {
            let targets: Vec<String> = key.split(',').map(|name| name.trim().to_string()).collect();
            for target in &targets {
                let column = table.column(target).ok_or_else(|| {
                    PopulateError::InvalidConfig(format!(
                        "rule '{key}' targets unknown column '{}.{target}'",
                        table.name
                    ))
                })?;
                if column.is_auto_assigned() {
                    return Err(PopulateError::InvalidConfig(format!(
                        "'{}.{target}' is assigned by the database and cannot take a rule",
                        table.name
                    )));
                }
                if covered.insert(target.clone(), slots.len()).is_some() {
                    return Err(PopulateError::InvalidConfig(format!(
                        "column '{}.{target}' has more than one rule",
                        table.name
                    )));
                }
            }
            if let Some(arity) = rule.arity()
                && arity != targets.len()
            {
                return Err(PopulateError::InvalidConfig(format!(
                    "rule '{key}' in '{}' yields {arity} values for {} columns",
                    table.name,
                    targets.len()
                )));
            }
            rule.validate().map_err(|message| {
                PopulateError::InvalidConfig(format!("rule '{key}' in '{}': {message}", table.name))
            })?;
            slots.push(Slot {
                targets,
                rule: rule.clone(),
            });
        }

        let mut enforced = Vec::new();
        let mut claimed = BTreeSet::new();
        for group in &table.unique_groups {
            let Some(group_slots) = group
                .columns
                .iter()
                .map(|column| covered.get(column).copied())
                .collect::<Option<BTreeSet<usize>>>()
            else {
                continue;
            };
            // overlapping groups are left to the database
            if group_slots.iter().any(|slot| claimed.contains(slot)) {
                continue;
            }
            claimed.extend(group_slots.iter().copied());
            let slots_in_order: Vec<usize> = group_slots.into_iter().collect();
            let flattened: Vec<&String> = slots_in_order
                .iter()
                .flat_map(|idx| slots[*idx].targets.iter())
                .collect();
            let indices = group
                .columns
                .iter()
                .filter_map(|column| flattened.iter().position(|target| *target == column))
                .collect();
            enforced.push(Enforced {
                unique: UniqueGenerator::new(table, group.columns.clone(), max_unique_tries),
                slots: slots_in_order,
                indices,
            });
        }

        Ok(Self {
            table: table.name.clone(),
            slots,
            enforced,
        })
    }

    /// Columns this generator fills.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.slots
            .iter()
            .flat_map(|slot| slot.targets.iter().map(String::as_str))
    }

    /// Names of the source statistics the rules sample from.
    pub fn stats_used(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().filter_map(|slot| match &slot.rule {
            ColumnRule::SampleStat { stat, .. } => Some(stat.as_str()),
            _ => None,
        })
    }

    /// Column groups guarded by a uniqueness enforcer.
    pub fn enforced_groups(&self) -> impl Iterator<Item = &[String]> {
        self.enforced.iter().map(|enforced| enforced.unique.columns())
    }
}

#[async_trait]
impl RowGenerator for RuleGenerator {
    async fn generate(&mut self, ctx: &mut GenerationContext<'_>) -> Result<Row> {
        let RuleGenerator {
            table,
            slots,
            enforced,
        } = self;
        let table = table.as_str();
        let mut row = Row::new();
        let mut done = vec![false; slots.len()];

        for group in enforced.iter_mut() {
            let stats = ctx.stats;
            let rng = &mut *ctx.rng;
            let slots = &*slots;
            let members = &group.slots;
            let values = group
                .unique
                .generate(&mut *ctx.dst, &group.indices, || {
                    let mut values = Vec::new();
                    for idx in members {
                        values.extend(slots[*idx].draw(table, stats, rng)?);
                    }
                    Ok(values)
                })
                .await?;
            let targets = members.iter().flat_map(|idx| slots[*idx].targets.iter());
            row.extend(targets.cloned().zip(values));
            for idx in members {
                done[*idx] = true;
            }
        }

        for (idx, slot) in slots.iter().enumerate() {
            if done[idx] {
                continue;
            }
            let values = slot.draw(table, ctx.stats, ctx.rng)?;
            row.extend(slot.targets.iter().cloned().zip(values));
        }
        Ok(row)
    }
}
