//! Standardization of numeric features, fit on the training partition

#![allow(non_snake_case)]

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::table::{Column, Table};
use crate::error::{PipelineError, Result};
use crate::preprocessing::stats;

/// Per-column `{mean, scale}` in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingParams {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl ScalingParams {
    /// Scales the fitted columns of `table` in place. Absent columns are
    /// synthesized as 0 before scaling and NaN results become 0. Returns the
    /// number of synthesized columns. A fitted column arriving as text is a
    /// schema violation.
    pub fn transform_table(&self, table: &mut Table) -> Result<usize> {
        let n = table.n_rows();
        let mut synthesized = 0;
        for (j, name) in self.columns.iter().enumerate() {
            let raw = match table.column(name) {
                Some(Column::Numeric(values)) => values.to_vec(),
                Some(Column::Text(_)) => {
                    return Err(PipelineError::schema(
                        "scaler",
                        format!("column {} holds text but was numeric in training", name),
                    ));
                }
                None => {
                    synthesized += 1;
                    vec![0.0; n]
                }
            };
            let scaled = raw
                .iter()
                .map(|v| {
                    let z = (v - self.mean[j]) / self.scale[j];
                    if z.is_nan() {
                        0.0
                    } else {
                        z
                    }
                })
                .collect();
            table.set_numeric(name.as_str(), scaled);
        }
        if synthesized > 0 {
            tracing::warn!("{} training feature columns absent from input, filled with 0", synthesized);
        }
        Ok(synthesized)
    }

    /// (X - mean) / scale over a matrix whose columns follow `columns`.
    pub fn transform(&self, X: &Array2<f64>) -> Array2<f64> {
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(self.scale.clone());
        (X - &mean) / &scale
    }

    pub fn inverse_transform(&self, X: &Array2<f64>) -> Array2<f64> {
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(self.scale.clone());
        X * &scale + &mean
    }
}

pub struct Scaler {
    params: Option<ScalingParams>,
}

impl Scaler {
    pub fn new() -> Self {
        Self { params: None }
    }

    /// Fits mean and population standard deviation per column; a
    /// near-zero deviation becomes 1.
    pub fn fit(&mut self, train: &Table, columns: &[String]) -> Result<&ScalingParams> {
        if train.n_rows() == 0 {
            return Err(PipelineError::InvalidConfig("cannot fit scaler on an empty table".to_string()));
        }
        let X = to_matrix(train, columns)?;

        let mut mean = X
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::InvalidConfig("failed to compute column means".to_string()))?;
        let mut std = X.std_axis(Axis(0), 0.0);

        // Columns holding NaN fall back to NaN-skipping statistics
        for (j, column) in X.axis_iter(Axis(1)).enumerate() {
            if mean[j].is_nan() {
                let values = column.to_vec();
                mean[j] = stats::mean(&values);
                std[j] = stats::population_std(&values);
            }
        }
        for (j, val) in std.iter_mut().enumerate() {
            if !(*val >= 1e-10) {
                *val = 1.0;
            }
            if mean[j].is_nan() {
                mean[j] = 0.0;
            }
        }

        Ok(self.params.insert(ScalingParams {
            columns: columns.to_vec(),
            mean: mean.to_vec(),
            scale: std.to_vec(),
        }))
    }

    pub fn transform(&self, table: &mut Table) -> Result<usize> {
        let params = self.params.as_ref().ok_or(PipelineError::NotFitted("scaler"))?;
        params.transform_table(table)
    }

    pub fn fit_transform(&mut self, table: &mut Table, columns: &[String]) -> Result<usize> {
        self.fit(table, columns)?;
        self.transform(table)
    }

    pub fn into_params(self) -> Option<ScalingParams> {
        self.params
    }
}

impl Default for Scaler {
    fn default() -> Self {
        Self::new()
    }
}

/// Numeric columns of `table` as an `(rows, columns)` matrix.
pub fn to_matrix(table: &Table, columns: &[String]) -> Result<Array2<f64>> {
    let mut X = Array2::zeros((table.n_rows(), columns.len()));
    for (j, name) in columns.iter().enumerate() {
        let values = table
            .numeric(name)
            .ok_or_else(|| PipelineError::schema("scaler", format!("numeric column {} not found", name)))?;
        X.column_mut(j).iter_mut().zip(values).for_each(|(dst, v)| *dst = *v);
    }
    Ok(X)
}
