//! Audit report of one preprocessing run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::preprocessing::binning::BinningSummary;
use crate::preprocessing::encoding::EncodingMap;
use crate::preprocessing::feature_engineering::TemporalAudit;
use crate::preprocessing::imputation::MissingValueReport;
use crate::preprocessing::leakage::LeakageSummary;
use crate::preprocessing::normalization::ScalingParams;
use crate::preprocessing::outliers::OutlierBoundsMap;
use crate::preprocessing::rebalance::RebalanceSummary;
use crate::preprocessing::split::SplitSummary;
use crate::profile::Cutoff;
use crate::types::{ClassDistribution, Partition, Shape};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalShapes {
    pub train: Shape,
    pub test: Shape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingReport {
    pub dataset: String,
    pub generated_at: DateTime<Utc>,
    pub prediction_point: String,
    pub cutoff: Cutoff,
    pub original_shape: Shape,
    pub final_shape: FinalShapes,
    pub features_before: Vec<String>,
    pub features_after: Vec<String>,
    pub missing_values: MissingValueReport,
    /// Filled cells per column (both partitions).
    pub imputed_values: BTreeMap<String, usize>,
    pub derived_features: Vec<String>,
    pub temporal: TemporalAudit,
    pub binning: BinningSummary,
    pub duplicates_removed: usize,
    pub leakage: LeakageSummary,
    pub encoding_mappings: EncodingMap,
    /// Cells without a fitted category, per source column (both partitions).
    pub unknown_categories: BTreeMap<String, usize>,
    pub outlier_bounds: OutlierBoundsMap,
    /// Capped cells per column (both partitions).
    pub capped_values: BTreeMap<String, usize>,
    pub scaling_params: ScalingParams,
    pub split: SplitSummary,
    /// Training rows added by oversampling, when enabled.
    pub rebalance: Option<RebalanceSummary>,
    /// Label distribution keyed by partition, after oversampling.
    pub class_distribution: BTreeMap<Partition, ClassDistribution>,
}

/// Adds per-column counts from `other` into `into`.
pub fn merge_counts(into: &mut BTreeMap<String, usize>, other: BTreeMap<String, usize>) {
    for (column, count) in other {
        *into.entry(column).or_insert(0) += count;
    }
}
