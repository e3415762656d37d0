//! Weighted sampling from grouped aggregate query results.

use std::collections::BTreeMap;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use relsynth_core::{Row, Value};

use crate::errors::{PopulateError, Result};

/// Which columns of the sampled group to return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueColumns {
    /// The whole row.
    #[default]
    All,
    One(String),
    Many(Vec<String>),
}

/// Output of one grouped draw, shaped by [`ValueColumns`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Scalar(Value),
    Tuple(Vec<Value>),
    Row(Row),
}

impl Sample {
    /// Flatten into values in column order; a whole row yields its values by column name.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Sample::Scalar(value) => vec![value],
            Sample::Tuple(values) => values,
            Sample::Row(row) => row.into_values().collect(),
        }
    }
}

/// Draw one group from `rows`, weighted by `weights_column`.
///
/// Only rows whose `filter` columns equal the required values take part.
/// Weights that are missing, non-numeric or not positive count as 1.
pub fn sample_grouped<R: Rng + ?Sized>(
    stat: &str,
    rows: &[Row],
    weights_column: &str,
    filter: &BTreeMap<String, Value>,
    value_columns: &ValueColumns,
    rng: &mut R,
) -> Result<Sample> {
    let candidates: Vec<&Row> = rows
        .iter()
        .filter(|row| matches_filter(row, filter))
        .collect();
    if candidates.is_empty() {
        return Err(PopulateError::EmptyResult {
            stat: stat.to_string(),
            filter: filter.clone(),
        });
    }

    let weights: Vec<f64> = candidates
        .iter()
        .map(|row| coerce_weight(row.get(weights_column)))
        .collect();
    let index = WeightedIndex::new(&weights).map_err(|err| {
        PopulateError::InvalidPlan(format!("invalid weights in '{stat}': {err}"))
    })?;
    let row = candidates[index.sample(rng)];

    match value_columns {
        ValueColumns::All => Ok(Sample::Row(row.clone())),
        ValueColumns::One(column) => Ok(Sample::Scalar(project(stat, row, column)?)),
        ValueColumns::Many(columns) => columns
            .iter()
            .map(|column| project(stat, row, column))
            .collect::<Result<Vec<_>>>()
            .map(Sample::Tuple),
    }
}

fn matches_filter(row: &Row, filter: &BTreeMap<String, Value>) -> bool {
    filter.iter().all(|(column, required)| {
        row.get(column)
            .is_some_and(|value| value.key() == required.key())
    })
}

fn coerce_weight(value: Option<&Value>) -> f64 {
    match value.and_then(Value::as_f64) {
        Some(weight) if weight > 0.0 && weight.is_finite() => weight,
        _ => 1.0,
    }
}

fn project(stat: &str, row: &Row, column: &str) -> Result<Value> {
    row.get(column).cloned().ok_or_else(|| {
        PopulateError::InvalidConfig(format!("statistic '{stat}' has no column '{column}'"))
    })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn colours() -> Vec<Row> {
        vec![
            row(&[("num", Value::Int(3)), ("x", Value::from("red"))]),
            row(&[("num", Value::Int(1)), ("x", Value::from("blue"))]),
        ]
    }

    #[test]
    fn samples_proportionally_to_weights() {
        let rows = colours();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut red = 0_u32;
        let mut blue = 0_u32;
        for _ in 0..8000 {
            let sample = sample_grouped(
                "colours",
                &rows,
                "num",
                &BTreeMap::new(),
                &ValueColumns::One("x".to_string()),
                &mut rng,
            )
            .expect("sample");
            match sample {
                Sample::Scalar(Value::Text(colour)) if colour == "red" => red += 1,
                Sample::Scalar(Value::Text(colour)) if colour == "blue" => blue += 1,
                other => panic!("unexpected sample {other:?}"),
            }
        }
        let ratio = red as f64 / blue as f64;
        assert!((2.6..3.4).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn equal_weights_converge_to_uniform() {
        let rows: Vec<Row> = (0..4)
            .map(|idx| row(&[("count", Value::Int(5)), ("k", Value::Int(idx))]))
            .collect();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut counts = [0_u32; 4];
        for _ in 0..8000 {
            let sample = sample_grouped(
                "uniform",
                &rows,
                "count",
                &BTreeMap::new(),
                &ValueColumns::One("k".to_string()),
                &mut rng,
            )
            .expect("sample");
            let Sample::Scalar(Value::Int(k)) = sample else {
                panic!("unexpected sample");
            };
            counts[k as usize] += 1;
        }
        for count in counts {
            assert!((1750..2250).contains(&count), "count was {count}");
        }
    }

    #[test]
    fn non_positive_weights_count_as_one() {
        let rows = vec![
            row(&[("num", Value::Int(0)), ("x", Value::from("zero"))]),
            row(&[("num", Value::Int(-4)), ("x", Value::from("negative"))]),
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut seen_zero = false;
        let mut seen_negative = false;
        for _ in 0..200 {
            let sample = sample_grouped(
                "w",
                &rows,
                "num",
                &BTreeMap::new(),
                &ValueColumns::One("x".to_string()),
                &mut rng,
            )
            .expect("sample");
            match sample {
                Sample::Scalar(Value::Text(x)) if x == "zero" => seen_zero = true,
                Sample::Scalar(Value::Text(x)) if x == "negative" => seen_negative = true,
                other => panic!("unexpected sample {other:?}"),
            }
        }
        assert!(seen_zero && seen_negative);
    }

    #[test]
    fn filter_restricts_candidates() {
        let rows = vec![
            row(&[("n", Value::Int(100)), ("sex", Value::from("F")), ("age", Value::Int(30))]),
            row(&[("n", Value::Int(1)), ("sex", Value::from("M")), ("age", Value::Int(40))]),
        ];
        let filter = BTreeMap::from([("sex".to_string(), Value::from("M"))]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..50 {
            let sample = sample_grouped(
                "ages",
                &rows,
                "n",
                &filter,
                &ValueColumns::Many(vec!["age".to_string(), "sex".to_string()]),
                &mut rng,
            )
            .expect("sample");
            assert_eq!(sample, Sample::Tuple(vec![Value::Int(40), Value::from("M")]));
        }
    }

    #[test]
    fn filter_eliminating_everything_is_empty_result() {
        let rows = colours();
        let filter = BTreeMap::from([("x".to_string(), Value::from("green"))]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = sample_grouped("colours", &rows, "num", &filter, &ValueColumns::All, &mut rng)
            .unwrap_err();
        assert!(matches!(err, PopulateError::EmptyResult { .. }));
        assert!(err.is_row_level());
    }

    #[test]
    fn returns_whole_row_without_value_columns() {
        let rows = vec![colours().remove(1)];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let sample = sample_grouped(
            "colours",
            &rows,
            "num",
            &BTreeMap::new(),
            &ValueColumns::All,
            &mut rng,
        )
        .expect("sample");
        assert_eq!(sample, Sample::Row(rows[0].clone()));
    }

    #[test]
    fn missing_value_column_is_config_error() {
        let rows = colours();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = sample_grouped(
            "colours",
            &rows,
            "num",
            &BTreeMap::new(),
            &ValueColumns::One("shade".to_string()),
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, PopulateError::InvalidConfig(_)));
    }
}
