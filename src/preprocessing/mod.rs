/// Preprocessing stages

pub mod binning;
pub mod derived;
pub mod encoding;
pub mod feature_engineering;
pub mod imputation;
pub mod leakage;
pub mod normalization;
pub mod outliers;
pub mod rebalance;
pub mod split;
pub mod stats;

pub use binning::{BinningSummary, TargetBinner};
pub use encoding::{CategoricalEncoder, ColumnEncoding, EncodingMap};
pub use feature_engineering::{TemporalAudit, TemporalFeatureEngine};
pub use imputation::{FillValue, ImputationMap, MissingValueAction, MissingValueImputer};
pub use leakage::{LeakageGuard, LeakageSummary};
pub use normalization::{Scaler, ScalingParams};
pub use outliers::{OutlierBoundsMap, OutlierCapper};
pub use rebalance::{RandomOversampler, RebalanceSummary};
pub use split::{SplitStrategy, Splitter};
