//! Per-source preprocessing pipeline
//!
//! load -> derived features -> temporal features -> binning -> dedupe ->
//! leakage scan -> split -> entity overlap check -> impute -> encode ->
//! cap -> scale -> optional oversampling of train. Every fitted artifact is
//! fit on the training partition.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data::loader::{RecordLoader, SourceFrame};
use crate::data::table::Table;
use crate::error::{PipelineError, Result};
use crate::preprocessing::derived::apply_derived_features;
use crate::preprocessing::{
    CategoricalEncoder, EncodingMap, ImputationMap, LeakageGuard, MissingValueImputer, OutlierBoundsMap, OutlierCapper,
    RandomOversampler, Scaler, ScalingParams, SplitStrategy, Splitter, TargetBinner, TemporalFeatureEngine,
};
use crate::profile::SourceProfile;
use crate::report::{merge_counts, FinalShapes, PreprocessingReport};
use crate::types::{Partition, WeaknessLevel, LABEL_COLUMN};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_output_dir() -> PathBuf { PathBuf::from("processed_data") }
fn default_reports_dir() -> PathBuf { PathBuf::from("reports") }
fn default_seed() -> u64 { 42 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            reports_dir: default_reports_dir(),
            seed: default_seed(),
        }
    }
}

/// Fitted artifacts applied unchanged to test rows and novel records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    pub dataset: String,
    pub imputation: ImputationMap,
    pub encoding: EncodingMap,
    pub outliers: OutlierBoundsMap,
    pub scaling: ScalingParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyStats {
    pub imputed_values: BTreeMap<String, usize>,
    pub unknown_categories: BTreeMap<String, usize>,
    pub capped_values: BTreeMap<String, usize>,
    pub synthesized_columns: usize,
}

impl FittedPreprocessor {
    pub fn feature_columns(&self) -> &[String] {
        &self.scaling.columns
    }

    /// Imputes, encodes, caps and scales `table`, returning exactly the
    /// training feature columns in training order.
    pub fn transform(&self, mut table: Table) -> Result<(Table, ApplyStats)> {
        let imputed_values = self.imputation.apply(&mut table);
        let unknown_categories = self.encoding.apply(&mut table);
        let capped_values = self.outliers.apply(&mut table);
        let synthesized_columns = self.scaling.transform_table(&mut table)?;
        let table = table.select_columns(&self.scaling.columns)?;
        Ok((
            table,
            ApplyStats {
                imputed_values,
                unknown_categories,
                capped_values,
                synthesized_columns,
            },
        ))
    }
}

pub struct PipelineOutcome {
    pub train: Table,
    pub test: Table,
    pub preprocessor: FittedPreprocessor,
    pub report: PreprocessingReport,
}

pub struct PreprocessingPipeline {
    profile: SourceProfile,
    config: PipelineConfig,
    prediction_point: String,
}

impl PreprocessingPipeline {
    pub fn new(profile: SourceProfile, config: PipelineConfig) -> Result<Self> {
        profile.validate()?;
        let prediction_point = profile.default_cutoff.clone();
        Ok(Self {
            profile,
            config,
            prediction_point,
        })
    }

    pub fn with_prediction_point(mut self, prediction_point: impl Into<String>) -> Result<Self> {
        let prediction_point = prediction_point.into();
        self.profile.resolve_cutoff(&prediction_point)?;
        self.prediction_point = prediction_point;
        Ok(self)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> Result<PipelineOutcome> {
        tracing::info!(
            "{}: preprocessing at prediction point {}",
            self.profile.name,
            self.prediction_point
        );
        let frame = RecordLoader::new(&self.profile, &self.config.data_dir).load()?;
        self.process(frame)
    }

    pub fn process(&self, frame: SourceFrame) -> Result<PipelineOutcome> {
        let profile = &self.profile;
        let name = profile.name.as_str();
        let cutoff = profile.resolve_cutoff(&self.prediction_point)?;
        let entity_column = profile.entity_column.clone();

        let SourceFrame { entities: mut table, events } = frame;
        let original_shape = table.shape();
        let features_before = table.names().to_vec();

        let derived_features = apply_derived_features(name, &mut table, &profile.derived_features)?;

        let engine = TemporalFeatureEngine::new(profile, cutoff.clone());
        let engineered = engine.build(table, events.as_ref())?;
        let mut table = engineered.table;

        let binning = TargetBinner::new(&profile.binning).apply(name, &mut table)?;

        let duplicates_removed = match (&entity_column, profile.deduplicate_entities) {
            (Some(column), true) => deduplicate(&mut table, column),
            _ => 0,
        };
        if duplicates_removed > 0 {
            tracing::info!("{}: removed {} duplicate entity rows", name, duplicates_removed);
        }

        let guard = LeakageGuard::from_profile(profile);
        let mut leakage = guard.summary();
        leakage.emergency_removals = guard.scan(&mut table);

        // Partition
        let labels = read_labels(name, &table)?;
        let entity_ids = entity_ids(&table, entity_column.as_deref());
        let strategy = match profile.split {
            SplitStrategy::RowLevel if has_duplicates(&entity_ids) => {
                tracing::warn!("{}: entities span several rows, switching to entity-level split", name);
                SplitStrategy::EntityLevel
            }
            strategy => strategy,
        };
        let splitter = Splitter::new(profile.test_fraction, self.config.seed);
        let indices = splitter.split(strategy, &labels, Some(entity_ids.as_slice()))?;

        let pick = |rows: &[usize]| rows.iter().map(|&i| entity_ids[i].clone()).collect::<Vec<_>>();
        let (train_entities, test_entities) = guard.verify_disjoint(&pick(&indices.train), &pick(&indices.test))?;
        leakage.train_entities = train_entities;
        leakage.test_entities = test_entities;
        leakage.entity_overlap = 0;

        let mut train = table.select_rows(&indices.train);
        let mut test = table.select_rows(&indices.test);
        drop(table);

        let mut protected: BTreeSet<String> = BTreeSet::from([LABEL_COLUMN.to_string()]);
        protected.extend(entity_column.iter().cloned());

        // Missing values; future and outcome columns are never touched
        let mut skip = profile.forbidden_set();
        skip.extend(protected.iter().cloned());
        let mut imputer = MissingValueImputer::new(profile.missing_drop_threshold);
        let missing_values = imputer.fit(&train, &skip);
        let mut imputed_values = imputer.transform(&mut train)?;
        merge_counts(&mut imputed_values, imputer.transform(&mut test)?);

        // Encoding
        let mut encoder = CategoricalEncoder::new();
        encoder.fit(&train, &protected);
        let mut unknown_categories = encoder.transform(&mut train)?;
        merge_counts(&mut unknown_categories, encoder.transform(&mut test)?);

        // Outlier capping
        let mut capper = OutlierCapper::new(profile.iqr_multiplier);
        capper.fit(&train, &protected);
        let mut capped_values = capper.transform(&mut train)?;
        merge_counts(&mut capped_values, capper.transform(&mut test)?);
        tracing::info!(
            "{}: capped {} values",
            name,
            capped_values.values().sum::<usize>()
        );

        // Scaling
        if let Some(column) = &entity_column {
            train.drop_column(column);
            test.drop_column(column);
        }
        let feature_columns: Vec<String> = train
            .numeric_names()
            .into_iter()
            .filter(|c| c != LABEL_COLUMN)
            .collect();
        if let Some(stray) = train.text_names().first() {
            return Err(PipelineError::schema(name, format!("column {} left unencoded", stray)));
        }
        let mut scaler = Scaler::new();
        scaler.fit_transform(&mut train, &feature_columns)?;
        scaler.transform(&mut test)?;

        let preprocessor = FittedPreprocessor {
            dataset: profile.name.clone(),
            imputation: imputer.into_map().unwrap_or_default(),
            encoding: encoder.into_map().unwrap_or_default(),
            outliers: capper.into_bounds().unwrap_or_default(),
            scaling: scaler.into_params().unwrap_or_default(),
        };

        let split = splitter.summary(&indices, &labels);
        let mut train_distribution = split.train_distribution.clone();

        let rebalance = if profile.oversample_train {
            let (balanced, summary) = RandomOversampler::new(self.config.seed).apply(&train)?;
            train = balanced;
            train_distribution = summary.after.clone();
            Some(summary)
        } else {
            None
        };

        let class_distribution = BTreeMap::from([
            (Partition::Train, train_distribution),
            (Partition::Test, split.test_distribution.clone()),
        ]);
        tracing::info!(
            "{}: train {:?}, test {:?}",
            name,
            train.shape(),
            test.shape()
        );

        let report = PreprocessingReport {
            dataset: profile.name.clone(),
            generated_at: chrono::Utc::now(),
            prediction_point: self.prediction_point.clone(),
            cutoff,
            original_shape,
            final_shape: FinalShapes {
                train: train.shape(),
                test: test.shape(),
            },
            features_before,
            features_after: feature_columns,
            missing_values,
            imputed_values,
            derived_features,
            temporal: engineered.audit,
            binning,
            duplicates_removed,
            leakage,
            encoding_mappings: preprocessor.encoding.clone(),
            unknown_categories,
            outlier_bounds: preprocessor.outliers.clone(),
            capped_values,
            scaling_params: preprocessor.scaling.clone(),
            split,
            rebalance,
            class_distribution,
        };

        Ok(PipelineOutcome {
            train,
            test,
            preprocessor,
            report,
        })
    }
}

fn read_labels(source: &str, table: &Table) -> Result<Vec<WeaknessLevel>> {
    let values = table
        .numeric(LABEL_COLUMN)
        .ok_or_else(|| PipelineError::schema(source, "label column missing after binning"))?;
    values
        .iter()
        .map(|&v| {
            WeaknessLevel::from_value(v)
                .ok_or_else(|| PipelineError::schema(source, format!("invalid label value {}", v)))
        })
        .collect()
}

/// Entity id per row; rows without an entity column are their own entity.
fn entity_ids(table: &Table, entity_column: Option<&str>) -> Vec<String> {
    let keys = entity_column.and_then(|c| table.keys(c));
    (0..table.n_rows())
        .map(|row| {
            keys.as_ref()
                .and_then(|k| k[row].clone())
                .unwrap_or_else(|| format!("row-{}", row))
        })
        .collect()
}

fn has_duplicates(ids: &[String]) -> bool {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().any(|id| !seen.insert(id.as_str()))
}

/// Keeps the first row of every entity.
fn deduplicate(table: &mut Table, entity_column: &str) -> usize {
    let Some(keys) = table.keys(entity_column) else {
        return 0;
    };
    let mut seen = HashSet::new();
    let keep: Vec<usize> = keys
        .iter()
        .enumerate()
        .filter(|(_, k)| match k {
            Some(k) => seen.insert(k.clone()),
            None => true,
        })
        .map(|(i, _)| i)
        .collect();
    let removed = table.n_rows() - keep.len();
    if removed > 0 {
        *table = table.select_rows(&keep);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::table::Column;

    #[test]
    fn test_deduplicate_keeps_first() {
        let mut table = Table::from_columns(vec![
            ("id_student", Column::Numeric(vec![1.0, 2.0, 1.0])),
            ("score", Column::Numeric(vec![10.0, 20.0, 30.0])),
        ])
        .unwrap();
        assert_eq!(deduplicate(&mut table, "id_student"), 1);
        assert_eq!(table.numeric("score").unwrap(), &[10.0, 20.0]);
    }

    #[test]
    fn test_entity_ids_fall_back_to_rows() {
        let table = Table::from_columns(vec![("age", Column::Numeric(vec![15.0, 16.0]))]).unwrap();
        assert_eq!(entity_ids(&table, None), vec!["row-0", "row-1"]);
        assert!(!has_duplicates(&entity_ids(&table, None)));
    }

    #[test]
    fn test_invalid_prediction_point_is_rejected() {
        let pipeline = PreprocessingPipeline::new(SourceProfile::uci(), PipelineConfig::default()).unwrap();
        assert!(pipeline.with_prediction_point("G7").is_err());
    }
}
