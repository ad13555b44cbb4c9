//! Random oversampling of the training partition
//!
//! Minority classes are topped up to the majority count by drawing existing
//! training rows with replacement. Test rows and fitted parameters never see
//! the duplicates.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::table::Table;
use crate::error::{PipelineError, Result};
use crate::types::{class_distribution, ClassDistribution, WeaknessLevel, LABEL_COLUMN};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSummary {
    pub before: ClassDistribution,
    pub after: ClassDistribution,
    pub added_rows: usize,
}

pub struct RandomOversampler {
    seed: u64,
}

impl RandomOversampler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Returns `train` with duplicated minority rows appended after the
    /// original rows.
    pub fn apply(&self, train: &Table) -> Result<(Table, RebalanceSummary)> {
        let values = train
            .numeric(LABEL_COLUMN)
            .ok_or_else(|| PipelineError::schema("oversampler", "label column missing"))?;
        let labels = values
            .iter()
            .map(|&v| {
                WeaknessLevel::from_value(v)
                    .ok_or_else(|| PipelineError::schema("oversampler", format!("invalid label value {}", v)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut by_class: BTreeMap<WeaknessLevel, Vec<usize>> = BTreeMap::new();
        for (row, label) in labels.iter().enumerate() {
            by_class.entry(*label).or_default().push(row);
        }
        let majority = by_class.values().map(Vec::len).max().unwrap_or(0);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut rows: Vec<usize> = (0..train.n_rows()).collect();
        for members in by_class.values() {
            for _ in members.len()..majority {
                rows.push(members[rng.gen_range(0..members.len())]);
            }
        }

        let added_rows = rows.len() - train.n_rows();
        let after: Vec<WeaknessLevel> = rows.iter().map(|&r| labels[r]).collect();
        let summary = RebalanceSummary {
            before: class_distribution(&labels),
            after: class_distribution(&after),
            added_rows,
        };
        tracing::info!("oversampled {} training rows to {} per class", added_rows, majority);
        Ok((train.select_rows(&rows), summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::Column;

    fn train() -> Table {
        Table::from_columns(vec![
            ("hours", Column::Numeric(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
            (LABEL_COLUMN, Column::Numeric(vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0])),
        ])
        .unwrap()
    }

    #[test]
    fn test_minorities_reach_the_majority_count() {
        let (balanced, summary) = RandomOversampler::new(42).apply(&train()).unwrap();

        assert_eq!(balanced.n_rows(), 12);
        assert_eq!(summary.added_rows, 6);
        assert_eq!(summary.before["1"], 1);
        for class in ["0", "1", "2"] {
            assert_eq!(summary.after[class], 4);
        }
        // single-member classes can only repeat themselves
        let hours = balanced.numeric("hours").unwrap();
        let labels = balanced.numeric(LABEL_COLUMN).unwrap();
        for (h, l) in hours.iter().zip(labels) {
            if *l == 1.0 {
                assert_eq!(*h, 5.0);
            }
        }
    }

    #[test]
    fn test_original_rows_come_first_and_seed_is_stable() {
        let table = train();
        let (first, _) = RandomOversampler::new(7).apply(&table).unwrap();
        let (again, _) = RandomOversampler::new(7).apply(&table).unwrap();

        assert_eq!(first, again);
        assert_eq!(&first.numeric("hours").unwrap()[..6], table.numeric("hours").unwrap());
    }

    #[test]
    fn test_balanced_input_is_unchanged() {
        let table = Table::from_columns(vec![(LABEL_COLUMN, Column::Numeric(vec![0.0, 1.0, 2.0]))]).unwrap();
        let (balanced, summary) = RandomOversampler::new(1).apply(&table).unwrap();

        assert_eq!(balanced, table);
        assert_eq!(summary.added_rows, 0);
    }
}
