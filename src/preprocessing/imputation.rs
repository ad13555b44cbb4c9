//! Missing-value handling: sparse columns are dropped, the rest imputed
//!
//! Drop decisions and fill values come from the training partition only and
//! are replayed unchanged on test rows and novel records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::data::table::{Column, Table};
use crate::error::{PipelineError, Result};
use crate::preprocessing::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MissingValueAction {
    Dropped { missing: usize, fraction: f64 },
    Median { missing: usize, value: f64 },
    Mode { missing: usize, value: String },
}

/// Actions taken on columns with gaps in the training partition.
pub type MissingValueReport = BTreeMap<String, MissingValueAction>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FillValue {
    Median(f64),
    Mode(String),
}

/// Fitted imputation: columns to drop and one fill value per kept column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImputationMap {
    pub dropped: Vec<String>,
    pub fills: BTreeMap<String, FillValue>,
}

impl ImputationMap {
    /// Drops the fitted sparse columns and fills gaps in the rest. Returns
    /// the number of filled cells per column.
    pub fn apply(&self, table: &mut Table) -> BTreeMap<String, usize> {
        table.drop_columns(&self.dropped);

        let mut filled = BTreeMap::new();
        for (name, fill) in &self.fills {
            let Some(column) = table.column(name) else {
                continue;
            };
            let missing = column.missing_count();
            if missing == 0 {
                continue;
            }
            let replacement = match (column, fill) {
                (Column::Numeric(values), FillValue::Median(value)) => {
                    Column::Numeric(values.iter().map(|v| if v.is_nan() { *value } else { *v }).collect())
                }
                (Column::Text(values), FillValue::Mode(value)) => Column::Text(
                    values
                        .iter()
                        .map(|v| Some(v.clone().unwrap_or_else(|| value.clone())))
                        .collect(),
                ),
                _ => {
                    tracing::warn!("{}: column type differs from training, gaps left as is", name);
                    continue;
                }
            };
            table.set_column(name.as_str(), replacement);
            filled.insert(name.clone(), missing);
        }
        filled
    }
}

pub struct MissingValueImputer {
    drop_threshold: f64,
    map: Option<ImputationMap>,
}

impl MissingValueImputer {
    pub fn new(drop_threshold: f64) -> Self {
        Self {
            drop_threshold,
            map: None,
        }
    }

    /// Decides on `train` which columns to drop (missing fraction above the
    /// threshold, or entirely missing) and the median or mode of every other
    /// column. Columns in `skip` are left untouched.
    pub fn fit(&mut self, train: &Table, skip: &BTreeSet<String>) -> MissingValueReport {
        let mut report = MissingValueReport::new();
        let mut map = ImputationMap::default();
        let n_rows = train.n_rows();

        for (name, column) in train.iter() {
            if skip.contains(name) || n_rows == 0 {
                continue;
            }
            let missing = column.missing_count();
            let fraction = missing as f64 / n_rows as f64;
            if fraction > self.drop_threshold || missing == n_rows {
                tracing::info!("dropping column {} ({:.1}% missing)", name, fraction * 100.0);
                map.dropped.push(name.to_string());
                report.insert(name.to_string(), MissingValueAction::Dropped { missing, fraction });
                continue;
            }

            let fill = match column {
                Column::Numeric(values) => FillValue::Median(stats::median(values)),
                Column::Text(values) => FillValue::Mode(mode(values).unwrap_or_default()),
            };
            if missing > 0 {
                let action = match &fill {
                    FillValue::Median(value) => MissingValueAction::Median { missing, value: *value },
                    FillValue::Mode(value) => MissingValueAction::Mode {
                        missing,
                        value: value.clone(),
                    },
                };
                tracing::debug!("imputing {} missing values in {}: {:?}", missing, name, action);
                report.insert(name.to_string(), action);
            }
            map.fills.insert(name.to_string(), fill);
        }

        self.map = Some(map);
        report
    }

    pub fn transform(&self, table: &mut Table) -> Result<BTreeMap<String, usize>> {
        let map = self.map.as_ref().ok_or(PipelineError::NotFitted("imputer"))?;
        Ok(map.apply(table))
    }

    pub fn into_map(self) -> Option<ImputationMap> {
        self.map
    }
}

/// Most frequent value; ties go to the lexicographically smallest.
fn mode(values: &[Option<String>]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for v in values.iter().flatten() {
        *counts.entry(v.as_str()).or_insert(0) += 1;
    }
    let best = counts.values().copied().max()?;
    counts
        .into_iter()
        .find(|(_, c)| *c == best)
        .map(|(v, _)| v.to_string())
}
