//! Splitter: seeded, label-stratified train/test partitioning

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::types::{class_distribution, ClassDistribution, WeaknessLevel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Every row is an independent entity.
    #[default]
    RowLevel,
    /// All rows of an entity land on the same side.
    EntityLevel,
}

#[derive(Debug, Clone)]
pub struct SplitIndices {
    pub strategy: SplitStrategy,
    /// Sorted row indices.
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitSummary {
    pub strategy: Option<SplitStrategy>,
    pub test_fraction: f64,
    pub seed: u64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub train_distribution: ClassDistribution,
    pub test_distribution: ClassDistribution,
}

pub struct Splitter {
    test_fraction: f64,
    seed: u64,
}

impl Splitter {
    pub fn new(test_fraction: f64, seed: u64) -> Self {
        Self { test_fraction, seed }
    }

    /// Splits rows. With `EntityLevel`, rows are grouped by `entity_ids` and
    /// each group is stratified by its first label.
    pub fn split(
        &self,
        strategy: SplitStrategy,
        labels: &[WeaknessLevel],
        entity_ids: Option<&[String]>,
    ) -> Result<SplitIndices> {
        let groups: Vec<(WeaknessLevel, Vec<usize>)> = match strategy {
            SplitStrategy::RowLevel => labels.iter().enumerate().map(|(i, l)| (*l, vec![i])).collect(),
            SplitStrategy::EntityLevel => {
                let ids = entity_ids.ok_or_else(|| {
                    PipelineError::InvalidConfig("entity-level split needs entity ids".to_string())
                })?;
                if ids.len() != labels.len() {
                    return Err(PipelineError::InvalidConfig(format!(
                        "{} entity ids for {} labels",
                        ids.len(),
                        labels.len()
                    )));
                }
                group_by_entity(ids, labels)
            }
        };

        let n = groups.len();
        let n_test = (n as f64 * self.test_fraction - 1e-9).ceil() as usize;
        if n < 2 || n_test == 0 || n_test >= n {
            return Err(PipelineError::InvalidConfig(format!(
                "cannot split {} groups at test fraction {}",
                n, self.test_fraction
            )));
        }

        let mut by_class: BTreeMap<WeaknessLevel, Vec<usize>> = BTreeMap::new();
        for (g, (label, _)) in groups.iter().enumerate() {
            by_class.entry(*label).or_default().push(g);
        }
        let quotas = allocate(&by_class, n, n_test);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut train = Vec::new();
        let mut test = Vec::new();
        for (class, members) in by_class.iter_mut() {
            members.shuffle(&mut rng);
            let take = quotas.get(class).copied().unwrap_or(0);
            for (pos, &g) in members.iter().enumerate() {
                let rows = &groups[g].1;
                if pos < take {
                    test.extend_from_slice(rows);
                } else {
                    train.extend_from_slice(rows);
                }
            }
        }
        train.sort_unstable();
        test.sort_unstable();

        tracing::info!(
            "{:?} split: {} train rows, {} test rows ({} groups)",
            strategy,
            train.len(),
            test.len(),
            n
        );
        Ok(SplitIndices { strategy, train, test })
    }

    pub fn summary(&self, indices: &SplitIndices, labels: &[WeaknessLevel]) -> SplitSummary {
        let pick = |rows: &[usize]| class_distribution(rows.iter().map(|&i| &labels[i]));
        SplitSummary {
            strategy: Some(indices.strategy),
            test_fraction: self.test_fraction,
            seed: self.seed,
            train_rows: indices.train.len(),
            test_rows: indices.test.len(),
            train_distribution: pick(&indices.train),
            test_distribution: pick(&indices.test),
        }
    }
}

/// Groups rows by entity in order of first appearance, keyed by the first label seen.
fn group_by_entity(ids: &[String], labels: &[WeaknessLevel]) -> Vec<(WeaknessLevel, Vec<usize>)> {
    let mut position: BTreeMap<&str, usize> = BTreeMap::new();
    let mut groups: Vec<(WeaknessLevel, Vec<usize>)> = Vec::new();
    for (row, id) in ids.iter().enumerate() {
        match position.get(id.as_str()) {
            Some(&g) => groups[g].1.push(row),
            None => {
                position.insert(id, groups.len());
                groups.push((labels[row], vec![row]));
            }
        }
    }
    groups
}

/// Per-class test quotas proportional to class size (largest remainder).
fn allocate(by_class: &BTreeMap<WeaknessLevel, Vec<usize>>, n: usize, n_test: usize) -> BTreeMap<WeaknessLevel, usize> {
    let mut quotas: BTreeMap<WeaknessLevel, usize> = BTreeMap::new();
    let mut remainders: Vec<(f64, WeaknessLevel)> = Vec::new();
    for (class, members) in by_class {
        let exact = members.len() as f64 * n_test as f64 / n as f64;
        quotas.insert(*class, exact.floor() as usize);
        remainders.push((exact - exact.floor(), *class));
    }
    let assigned: usize = quotas.values().sum();
    remainders.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, class) in remainders.into_iter().take(n_test.saturating_sub(assigned)) {
        if let Some(q) = quotas.get_mut(&class) {
            *q += 1;
        }
    }
    quotas
}
