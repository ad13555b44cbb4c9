//! TargetBinner: post-cutoff score or outcome to a 3-level weakness label

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::data::table::Table;
use crate::error::{PipelineError, Result};
use crate::preprocessing::stats;
use crate::profile::BinningPolicy;
use crate::types::{
    class_distribution, ClassDistribution, WeaknessLevel, LABEL_COLUMN, TARGET_OUTCOME_COLUMN,
    TARGET_SCORE_COLUMN,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinningSummary {
    pub policy: String,
    /// Score thresholds actually applied (moderate from, strong from).
    pub thresholds: Option<(f64, f64)>,
    /// Targets that fell back to Moderate: missing scores or unmapped outcomes.
    pub unmapped_count: usize,
    pub unmapped_values: BTreeMap<String, usize>,
    pub distribution: ClassDistribution,
}

pub struct TargetBinner<'a> {
    policy: &'a BinningPolicy,
}

impl<'a> TargetBinner<'a> {
    pub fn new(policy: &'a BinningPolicy) -> Self {
        Self { policy }
    }

    /// Thresholds `(moderate_from, strong_from)` for a continuous batch.
    pub fn score_thresholds(&self, scores: &[f64]) -> Option<(f64, f64)> {
        match self.policy {
            BinningPolicy::FixedThresholds { moderate_min, strong_min } => Some((*moderate_min, *strong_min)),
            BinningPolicy::PercentileRank { weak_below, strong_from } => Some((
                stats::quantile(scores, *weak_below),
                stats::quantile(scores, *strong_from),
            )),
            BinningPolicy::Categorical { .. } => None,
        }
    }

    /// Labels continuous scores; missing scores become Moderate and are counted.
    pub fn bin_scores(&self, scores: &[f64]) -> Result<(Vec<WeaknessLevel>, usize)> {
        let (moderate_from, strong_from) = self.score_thresholds(scores).ok_or_else(|| {
            PipelineError::InvalidConfig("categorical policy cannot bin scores".to_string())
        })?;
        let mut missing = 0;
        let labels = scores
            .iter()
            .map(|&s| {
                if s.is_nan() {
                    missing += 1;
                    WeaknessLevel::Moderate
                } else {
                    level_for(s, moderate_from, strong_from)
                }
            })
            .collect();
        Ok((labels, missing))
    }

    /// Labels categorical outcomes; values outside the mapping get the fallback.
    pub fn bin_outcomes(&self, outcomes: &[Option<String>]) -> Result<(Vec<WeaknessLevel>, BTreeMap<String, usize>)> {
        let BinningPolicy::Categorical { mapping, fallback } = self.policy else {
            return Err(PipelineError::InvalidConfig(
                "continuous policy cannot bin categorical outcomes".to_string(),
            ));
        };
        let mut unmapped: BTreeMap<String, usize> = BTreeMap::new();
        let labels = outcomes
            .iter()
            .map(|outcome| match outcome.as_deref().and_then(|o| mapping.get(o)) {
                Some(level) => *level,
                None => {
                    let key = outcome.clone().unwrap_or_else(|| "<missing>".to_string());
                    *unmapped.entry(key).or_insert(0) += 1;
                    *fallback
                }
            })
            .collect();
        Ok((labels, unmapped))
    }

    /// Replaces the materialized target with `weakness_level`.
    pub fn apply(&self, source: &str, table: &mut Table) -> Result<BinningSummary> {
        let mut summary = BinningSummary {
            policy: self.policy.name().to_string(),
            ..BinningSummary::default()
        };

        let labels = if let Some(scores) = table.numeric(TARGET_SCORE_COLUMN) {
            summary.thresholds = self.score_thresholds(scores);
            let (labels, missing) = self.bin_scores(scores)?;
            if missing > 0 {
                summary.unmapped_values.insert("<missing>".to_string(), missing);
            }
            labels
        } else if let Some(outcomes) = table.text(TARGET_OUTCOME_COLUMN) {
            let (labels, unmapped) = self.bin_outcomes(outcomes)?;
            summary.unmapped_values = unmapped;
            labels
        } else {
            return Err(PipelineError::schema(source, "no materialized target to bin"));
        };
        summary.unmapped_count = summary.unmapped_values.values().sum();
        if summary.unmapped_count > 0 {
            tracing::warn!(
                "{}: {} targets fell back to {} ({:?})",
                source,
                summary.unmapped_count,
                WeaknessLevel::Moderate,
                summary.unmapped_values
            );
        }

        let found: BTreeSet<u8> = labels.iter().map(|l| l.code()).collect();
        if found.len() < WeaknessLevel::ALL.len() {
            return Err(PipelineError::InsufficientClassDiversity {
                found: found.into_iter().collect(),
            });
        }

        summary.distribution = class_distribution(&labels);
        tracing::info!("{}: label distribution {:?}", source, summary.distribution);

        table.drop_columns(&[TARGET_SCORE_COLUMN, TARGET_OUTCOME_COLUMN]);
        table.set_numeric(LABEL_COLUMN, labels.iter().map(|l| l.code() as f64).collect());
        Ok(summary)
    }
}

fn level_for(score: f64, moderate_from: f64, strong_from: f64) -> WeaknessLevel {
    if score >= strong_from {
        WeaknessLevel::Strong
    } else if score >= moderate_from {
        WeaknessLevel::Moderate
    } else {
        WeaknessLevel::Weak
    }
}
