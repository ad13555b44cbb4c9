//! OutlierCapper: IQR clipping with bounds fit on the training partition

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::data::table::Table;
use crate::error::{PipelineError, Result};
use crate::preprocessing::stats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierBounds {
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
}

impl OutlierBounds {
    pub fn clip(&self, value: f64) -> f64 {
        if value.is_nan() {
            value
        } else {
            value.clamp(self.lower, self.upper)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierBoundsMap {
    pub multiplier: f64,
    pub columns: BTreeMap<String, OutlierBounds>,
}

impl OutlierBoundsMap {
    /// Clips every bounded column present in `table`; returns capped counts.
    pub fn apply(&self, table: &mut Table) -> BTreeMap<String, usize> {
        let mut capped = BTreeMap::new();
        for (name, bounds) in &self.columns {
            let Some(values) = table.numeric(name) else {
                continue;
            };
            let mut count = 0;
            let clipped: Vec<f64> = values
                .iter()
                .map(|&v| {
                    let c = bounds.clip(v);
                    if c != v && !v.is_nan() {
                        count += 1;
                    }
                    c
                })
                .collect();
            if count > 0 {
                capped.insert(name.clone(), count);
            }
            table.set_numeric(name.as_str(), clipped);
        }
        capped
    }
}

pub struct OutlierCapper {
    multiplier: f64,
    bounds: Option<OutlierBoundsMap>,
}

impl OutlierCapper {
    pub fn new(multiplier: f64) -> Self {
        Self {
            multiplier,
            bounds: None,
        }
    }

    /// Computes `[Q1 - k*IQR, Q3 + k*IQR]` per numeric column. Columns with two
    /// or fewer distinct values (indicators, binary codes) are not bounded.
    pub fn fit(&mut self, train: &Table, exclude: &BTreeSet<String>) -> &OutlierBoundsMap {
        let mut columns = BTreeMap::new();
        for (name, column) in train.iter() {
            if exclude.contains(name) || column.distinct_count() <= 2 {
                continue;
            }
            let Some(values) = column.as_numeric() else {
                continue;
            };
            let q1 = stats::quantile(values, 0.25);
            let q3 = stats::quantile(values, 0.75);
            let iqr = q3 - q1;
            columns.insert(
                name.to_string(),
                OutlierBounds {
                    q1,
                    q3,
                    lower: q1 - self.multiplier * iqr,
                    upper: q3 + self.multiplier * iqr,
                },
            );
        }
        tracing::debug!("outlier bounds fit on {} columns", columns.len());
        self.bounds.insert(OutlierBoundsMap {
            multiplier: self.multiplier,
            columns,
        })
    }

    pub fn transform(&self, table: &mut Table) -> Result<BTreeMap<String, usize>> {
        let bounds = self.bounds.as_ref().ok_or(PipelineError::NotFitted("outlier capper"))?;
        Ok(bounds.apply(table))
    }

    pub fn into_bounds(self) -> Option<OutlierBoundsMap> {
        self.bounds
    }
}
