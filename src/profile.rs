//! Per-source profiles: schema map, timeline, binning and leakage settings
//!
//! One pipeline serves every source; what differs between sources lives here
//! as data. Profiles serialize to JSON so a source can be re-tuned without
//! touching pipeline code.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::preprocessing::split::SplitStrategy;
use crate::types::{WeaknessLevel, TARGET_OUTCOME_COLUMN, TARGET_SCORE_COLUMN};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    /// Dataset name, also the prefix of every artifact file.
    pub name: String,
    pub layout: SourceLayout,
    /// Column identifying the entity; `None` means one entity per row.
    #[serde(default)]
    pub entity_column: Option<String>,
    /// Assessment columns of wide sources, ordered by `position`.
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    #[serde(default)]
    pub prediction_points: BTreeMap<String, Cutoff>,
    pub default_cutoff: String,
    pub target: TargetSource,
    pub binning: BinningPolicy,
    /// Columns that encode the outcome and are consumed by target construction.
    #[serde(default)]
    pub outcome_columns: Vec<String>,
    #[serde(default)]
    pub forbidden_columns: Vec<String>,
    #[serde(default = "default_forbidden_suffixes")]
    pub forbidden_suffixes: Vec<String>,
    #[serde(default)]
    pub derived_features: Vec<DerivedFeature>,
    #[serde(default)]
    pub thresholds: FeatureThresholds,
    #[serde(default)]
    pub split: SplitStrategy,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,
    #[serde(default = "default_missing_drop_threshold")]
    pub missing_drop_threshold: f64,
    #[serde(default)]
    pub deduplicate_entities: bool,
    /// Oversample minority classes in the training partition after scaling.
    #[serde(default)]
    pub oversample_train: bool,
}

fn default_forbidden_suffixes() -> Vec<String> {
    vec!["_percentile".to_string()]
}
fn default_test_fraction() -> f64 { 0.2 }
fn default_iqr_multiplier() -> f64 { 1.5 }
fn default_missing_drop_threshold() -> f64 { 0.5 }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum SourceLayout {
    /// Wide files with one schema, stacked row-wise.
    Stacked {
        files: Vec<StackedFile>,
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
    /// Entity file plus timestamped event streams.
    Relational(RelationalLayout),
}

fn default_delimiter() -> char { ',' }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackedFile {
    pub path: String,
    /// Constant columns added to every row of this file.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalLayout {
    pub entity_file: String,
    pub entity_columns: Vec<String>,
    #[serde(default)]
    pub registration: Option<RegistrationSpec>,
    pub assessments: AssessmentStreamSpec,
    #[serde(default)]
    pub activity: Option<ActivityStreamSpec>,
    #[serde(default = "default_days_per_week")]
    pub days_per_week: f64,
}

fn default_days_per_week() -> f64 { 7.0 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationSpec {
    pub file: String,
    pub date_column: String,
    /// Name of the emitted feature (earliest registration day).
    pub feature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentStreamSpec {
    pub events_file: String,
    pub metadata_file: String,
    pub join_key: String,
    pub timestamp_column: String,
    pub score_column: String,
    #[serde(default)]
    pub weight_column: Option<String>,
    #[serde(default)]
    pub type_column: Option<String>,
    #[serde(default)]
    pub submitted_column: Option<String>,
    #[serde(default)]
    pub banked_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStreamSpec {
    pub events_file: String,
    pub metadata_file: String,
    pub join_key: String,
    pub timestamp_column: String,
    pub clicks_column: String,
    #[serde(default)]
    pub type_column: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentKind {
    #[default]
    Grade,
    Quiz,
    Assignment,
    Exam,
    Project,
    Presentation,
}

impl AssessmentKind {
    pub fn is_theory(self) -> bool {
        matches!(self, AssessmentKind::Quiz | AssessmentKind::Exam)
    }

    pub fn is_practical(self) -> bool {
        matches!(self, AssessmentKind::Assignment | AssessmentKind::Project)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub column: String,
    pub position: u32,
    #[serde(default)]
    pub kind: AssessmentKind,
}

/// What may be known at prediction time. Fixed for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cutoff {
    /// Timeline entries with `position <= n` are available.
    Position(u32),
    /// Explicit set of available assessment columns.
    Assessments(Vec<String>),
    /// Course week; events on or before day `week * days_per_week` are available.
    Week(u32),
}

impl fmt::Display for Cutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cutoff::Position(p) => write!(f, "position {}", p),
            Cutoff::Assessments(names) => write!(f, "assessments {:?}", names),
            Cutoff::Week(w) => write!(f, "week {}", w),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TargetSource {
    /// Continuous score read from an outcome column; optionally the sum of
    /// all timeline columns when that column is absent.
    Column {
        name: String,
        #[serde(default)]
        fallback_sum: bool,
    },
    /// The first timeline entry after the cutoff.
    NextAssessment,
    /// Terminal categorical outcome.
    Outcome { column: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BinningPolicy {
    /// `score >= strong_min` is Strong, `score >= moderate_min` Moderate, else Weak.
    FixedThresholds { moderate_min: f64, strong_min: f64 },
    /// Percentile rank `< weak_below` is Weak, `>= strong_from` Strong.
    PercentileRank { weak_below: f64, strong_from: f64 },
    Categorical {
        mapping: BTreeMap<String, WeaknessLevel>,
        #[serde(default = "default_fallback_level")]
        fallback: WeaknessLevel,
    },
}

fn default_fallback_level() -> WeaknessLevel {
    WeaknessLevel::Moderate
}

impl BinningPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            BinningPolicy::FixedThresholds { .. } => "fixed_thresholds",
            BinningPolicy::PercentileRank { .. } => "percentile_rank",
            BinningPolicy::Categorical { .. } => "categorical",
        }
    }
}

/// Static features computed from always-available attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DerivedFeature {
    Mean { name: String, columns: Vec<String> },
    AbsDiff { name: String, left: String, right: String },
    Ratio {
        name: String,
        numerator: String,
        denominator: String,
        #[serde(default)]
        offset: f64,
    },
    /// `column * scale + offset`
    Affine {
        name: String,
        column: String,
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    Matches { name: String, column: String, value: String },
    Exceeds { name: String, column: String, threshold: f64 },
    WeightedSum {
        name: String,
        terms: Vec<WeightedTerm>,
        #[serde(default)]
        bias: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedTerm {
    pub column: String,
    pub weight: f64,
}

impl DerivedFeature {
    pub fn name(&self) -> &str {
        match self {
            DerivedFeature::Mean { name, .. }
            | DerivedFeature::AbsDiff { name, .. }
            | DerivedFeature::Ratio { name, .. }
            | DerivedFeature::Affine { name, .. }
            | DerivedFeature::Matches { name, .. }
            | DerivedFeature::Exceeds { name, .. }
            | DerivedFeature::WeightedSum { name, .. } => name,
        }
    }

    pub fn inputs(&self) -> Vec<&str> {
        match self {
            DerivedFeature::Mean { columns, .. } => columns.iter().map(String::as_str).collect(),
            DerivedFeature::AbsDiff { left, right, .. } => vec![left, right],
            DerivedFeature::Ratio { numerator, denominator, .. } => vec![numerator, denominator],
            DerivedFeature::Affine { column, .. }
            | DerivedFeature::Matches { column, .. }
            | DerivedFeature::Exceeds { column, .. } => vec![column],
            DerivedFeature::WeightedSum { terms, .. } => {
                terms.iter().map(|t| t.column.as_str()).collect()
            }
        }
    }
}

/// Thresholds behind the composite indicators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureThresholds {
    /// Maximum attainable score, used to normalize levels.
    #[serde(default = "default_score_scale")]
    pub score_scale: f64,
    #[serde(default = "default_passing_score")]
    pub passing_score: f64,
    /// Event-level sources flag averages below this as low performance.
    #[serde(default = "default_low_performance_score")]
    pub low_performance_score: f64,
    #[serde(default = "default_high_performer_quantile")]
    pub high_performer_quantile: f64,
    #[serde(default = "default_consistent_performer_quantile")]
    pub consistent_performer_quantile: f64,
    /// Weights of performance, consistency and progression risk.
    #[serde(default = "default_risk_weights")]
    pub risk_weights: [f64; 3],
    #[serde(default = "default_first_week_days")]
    pub first_week_days: f64,
}

fn default_score_scale() -> f64 { 100.0 }
fn default_passing_score() -> f64 { 60.0 }
fn default_low_performance_score() -> f64 { 50.0 }
fn default_high_performer_quantile() -> f64 { 0.75 }
fn default_consistent_performer_quantile() -> f64 { 0.25 }
fn default_risk_weights() -> [f64; 3] { [0.5, 0.3, 0.2] }
fn default_first_week_days() -> f64 { 7.0 }

impl Default for FeatureThresholds {
    fn default() -> Self {
        Self {
            score_scale: default_score_scale(),
            passing_score: default_passing_score(),
            low_performance_score: default_low_performance_score(),
            high_performer_quantile: default_high_performer_quantile(),
            consistent_performer_quantile: default_consistent_performer_quantile(),
            risk_weights: default_risk_weights(),
            first_week_days: default_first_week_days(),
        }
    }
}

impl SourceProfile {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PipelineError::MissingSourceFile {
                path: path.to_path_buf(),
            });
        }
        let profile: SourceProfile = serde_json::from_reader(std::fs::File::open(path)?)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn is_event_level(&self) -> bool {
        matches!(self.layout, SourceLayout::Relational(_))
    }

    /// Timeline sorted by position.
    pub fn ordered_timeline(&self) -> Vec<&TimelineEntry> {
        let mut entries: Vec<&TimelineEntry> = self.timeline.iter().collect();
        entries.sort_by_key(|e| e.position);
        entries
    }

    /// Resolves a prediction point name, or a bare number, to a cutoff.
    pub fn resolve_cutoff(&self, name: &str) -> Result<Cutoff> {
        if let Some(cutoff) = self.prediction_points.get(name) {
            return Ok(cutoff.clone());
        }
        if let Ok(n) = name.trim().parse::<u32>() {
            return Ok(if self.is_event_level() {
                Cutoff::Week(n)
            } else {
                Cutoff::Position(n)
            });
        }
        Err(PipelineError::InvalidConfig(format!(
            "{}: unknown prediction point {:?} (known: {:?})",
            self.name,
            name,
            self.prediction_points.keys().collect::<Vec<_>>()
        )))
    }

    /// Every column that must never reach the feature set.
    pub fn forbidden_set(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = self.forbidden_columns.iter().cloned().collect();
        set.extend(self.timeline.iter().map(|e| e.column.clone()));
        set.extend(self.outcome_columns.iter().cloned());
        match &self.target {
            TargetSource::Column { name, .. } => {
                set.insert(name.clone());
            }
            TargetSource::Outcome { column } => {
                set.insert(column.clone());
            }
            TargetSource::NextAssessment => {}
        }
        set.insert(TARGET_SCORE_COLUMN.to_string());
        set.insert(TARGET_OUTCOME_COLUMN.to_string());
        set
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(format!("{}: {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return invalid("empty dataset name".into());
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return invalid(format!("test_fraction {} outside (0, 1)", self.test_fraction));
        }
        if !(self.iqr_multiplier > 0.0) {
            return invalid(format!("iqr_multiplier {} must be positive", self.iqr_multiplier));
        }
        if !(self.missing_drop_threshold > 0.0 && self.missing_drop_threshold <= 1.0) {
            return invalid(format!(
                "missing_drop_threshold {} outside (0, 1]",
                self.missing_drop_threshold
            ));
        }

        let mut positions = BTreeSet::new();
        for entry in &self.timeline {
            if !positions.insert(entry.position) {
                return invalid(format!("duplicate timeline position {}", entry.position));
            }
        }
        let timeline_columns: BTreeSet<&str> =
            self.timeline.iter().map(|e| e.column.as_str()).collect();
        for (point, cutoff) in &self.prediction_points {
            if let Cutoff::Assessments(names) = cutoff {
                if let Some(unknown) = names.iter().find(|n| !timeline_columns.contains(n.as_str())) {
                    return invalid(format!("prediction point {} names unknown assessment {:?}", point, unknown));
                }
            }
        }

        match &self.binning {
            BinningPolicy::FixedThresholds { moderate_min, strong_min } if moderate_min >= strong_min => {
                return invalid(format!("moderate_min {} must be below strong_min {}", moderate_min, strong_min));
            }
            BinningPolicy::PercentileRank { weak_below, strong_from }
                if !(0.0 < *weak_below && weak_below < strong_from && *strong_from <= 1.0) =>
            {
                return invalid(format!("percentile cut points {} / {} out of order", weak_below, strong_from));
            }
            BinningPolicy::Categorical { mapping, .. } if mapping.is_empty() => {
                return invalid("empty outcome mapping".into());
            }
            _ => {}
        }
        let categorical_policy = matches!(self.binning, BinningPolicy::Categorical { .. });
        let categorical_target = matches!(self.target, TargetSource::Outcome { .. });
        if categorical_policy != categorical_target {
            return invalid("categorical binning requires an outcome target and vice versa".into());
        }
        if matches!(self.target, TargetSource::NextAssessment) && self.timeline.is_empty() {
            return invalid("next-assessment target needs a timeline".into());
        }

        let forbidden = self.forbidden_set();
        for feature in &self.derived_features {
            if let Some(leaky) = feature.inputs().into_iter().find(|c| forbidden.contains(*c)) {
                return invalid(format!("derived feature {} reads forbidden column {}", feature.name(), leaky));
            }
        }

        self.resolve_cutoff(&self.default_cutoff)?;
        Ok(())
    }

    /// UCI student performance (math and Portuguese), period grades G1..G3.
    pub fn uci() -> Self {
        let grade = |column: &str, position| TimelineEntry {
            column: column.to_string(),
            position,
            kind: AssessmentKind::Grade,
        };
        Self {
            name: "UCI".to_string(),
            layout: SourceLayout::Stacked {
                files: vec![
                    StackedFile {
                        path: "uci_data/student-mat.csv".to_string(),
                        tags: BTreeMap::from([("subject".to_string(), "math".to_string())]),
                    },
                    StackedFile {
                        path: "uci_data/student-por.csv".to_string(),
                        tags: BTreeMap::from([("subject".to_string(), "portuguese".to_string())]),
                    },
                ],
                delimiter: ';',
            },
            entity_column: None,
            timeline: vec![grade("G1", 1), grade("G2", 2), grade("G3", 3)],
            prediction_points: BTreeMap::from([
                ("G2".to_string(), Cutoff::Position(1)),
                ("G3".to_string(), Cutoff::Position(2)),
            ]),
            default_cutoff: "G2".to_string(),
            target: TargetSource::NextAssessment,
            binning: BinningPolicy::PercentileRank {
                weak_below: 0.25,
                strong_from: 0.75,
            },
            outcome_columns: Vec::new(),
            forbidden_columns: vec!["target_grade".to_string()],
            forbidden_suffixes: default_forbidden_suffixes(),
            derived_features: uci_derived_features(),
            thresholds: FeatureThresholds {
                score_scale: 20.0,
                passing_score: 10.0,
                ..FeatureThresholds::default()
            },
            split: SplitStrategy::RowLevel,
            test_fraction: default_test_fraction(),
            iqr_multiplier: default_iqr_multiplier(),
            missing_drop_threshold: default_missing_drop_threshold(),
            deduplicate_entities: false,
            oversample_train: false,
        }
    }

    /// AI course performance: eight ordered assessments plus a total.
    pub fn ai() -> Self {
        let entry = |column: &str, position, kind| TimelineEntry {
            column: column.to_string(),
            position,
            kind,
        };
        let names = |cols: &[&str]| cols.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        Self {
            name: "AI".to_string(),
            layout: SourceLayout::Stacked {
                files: vec![StackedFile {
                    path: "ai_course_data/Student Performance Dataset in AI course/Stu_Performance_dataset.csv"
                        .to_string(),
                    tags: BTreeMap::new(),
                }],
                delimiter: ',',
            },
            entity_column: None,
            timeline: vec![
                entry("Quiz ", 1, AssessmentKind::Quiz),
                entry("Assignment_1", 2, AssessmentKind::Assignment),
                entry("Midterm", 3, AssessmentKind::Exam),
                entry("Assignment_2", 4, AssessmentKind::Assignment),
                entry("Assignment_3", 5, AssessmentKind::Assignment),
                entry("Project", 6, AssessmentKind::Project),
                entry("Presentation", 7, AssessmentKind::Presentation),
                entry("Final_Exam", 8, AssessmentKind::Exam),
            ],
            prediction_points: BTreeMap::from([
                ("early".to_string(), Cutoff::Assessments(names(&["Quiz "]))),
                (
                    "midterm".to_string(),
                    Cutoff::Assessments(names(&["Quiz ", "Assignment_1", "Midterm"])),
                ),
                ("late".to_string(), Cutoff::Position(7)),
            ]),
            default_cutoff: "midterm".to_string(),
            target: TargetSource::Column {
                name: "Total".to_string(),
                fallback_sum: true,
            },
            binning: BinningPolicy::FixedThresholds {
                moderate_min: 60.0,
                strong_min: 75.0,
            },
            outcome_columns: names(&["Total", "Grade", "Categories"]),
            forbidden_columns: Vec::new(),
            forbidden_suffixes: default_forbidden_suffixes(),
            derived_features: Vec::new(),
            thresholds: FeatureThresholds::default(),
            split: SplitStrategy::RowLevel,
            test_fraction: default_test_fraction(),
            iqr_multiplier: default_iqr_multiplier(),
            missing_drop_threshold: default_missing_drop_threshold(),
            deduplicate_entities: false,
            oversample_train: false,
        }
    }

    /// Open University learning analytics: submissions and clicks by course day.
    pub fn ou() -> Self {
        Self {
            name: "OU".to_string(),
            layout: SourceLayout::Relational(RelationalLayout {
                entity_file: "ou_data/studentInfo.csv".to_string(),
                entity_columns: [
                    "id_student",
                    "gender",
                    "region",
                    "highest_education",
                    "age_band",
                    "disability",
                    "final_result",
                ]
                .iter()
                .map(|c| c.to_string())
                .collect(),
                registration: Some(RegistrationSpec {
                    file: "ou_data/studentRegistration.csv".to_string(),
                    date_column: "date_registration".to_string(),
                    feature: "enrollment_date".to_string(),
                }),
                assessments: AssessmentStreamSpec {
                    events_file: "ou_data/studentAssessment.csv".to_string(),
                    metadata_file: "ou_data/assessments.csv".to_string(),
                    join_key: "id_assessment".to_string(),
                    timestamp_column: "date".to_string(),
                    score_column: "score".to_string(),
                    weight_column: Some("weight".to_string()),
                    type_column: Some("assessment_type".to_string()),
                    submitted_column: Some("date_submitted".to_string()),
                    banked_column: Some("is_banked".to_string()),
                },
                activity: Some(ActivityStreamSpec {
                    events_file: "ou_data/studentVle.csv".to_string(),
                    metadata_file: "ou_data/vle.csv".to_string(),
                    join_key: "id_site".to_string(),
                    timestamp_column: "date".to_string(),
                    clicks_column: "sum_click".to_string(),
                    type_column: Some("activity_type".to_string()),
                }),
                days_per_week: default_days_per_week(),
            }),
            entity_column: Some("id_student".to_string()),
            timeline: Vec::new(),
            prediction_points: BTreeMap::new(),
            default_cutoff: "8".to_string(),
            target: TargetSource::Outcome {
                column: "final_result".to_string(),
            },
            binning: BinningPolicy::Categorical {
                mapping: BTreeMap::from([
                    ("Distinction".to_string(), WeaknessLevel::Strong),
                    ("Pass".to_string(), WeaknessLevel::Moderate),
                    ("Fail".to_string(), WeaknessLevel::Weak),
                    ("Withdrawn".to_string(), WeaknessLevel::Weak),
                ]),
                fallback: WeaknessLevel::Moderate,
            },
            outcome_columns: vec!["final_result".to_string()],
            forbidden_columns: [
                "weakness_score",
                "engagement_score",
                "performance_consistency",
                "time_management",
                "date_unregistration",
                "registration_duration",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            forbidden_suffixes: default_forbidden_suffixes(),
            derived_features: Vec::new(),
            thresholds: FeatureThresholds {
                passing_score: 40.0,
                ..FeatureThresholds::default()
            },
            split: SplitStrategy::EntityLevel,
            test_fraction: default_test_fraction(),
            iqr_multiplier: default_iqr_multiplier(),
            missing_drop_threshold: default_missing_drop_threshold(),
            deduplicate_entities: true,
            oversample_train: false,
        }
    }

    pub fn builtin(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "uci" => Some(Self::uci()),
            "ou" => Some(Self::ou()),
            "ai" => Some(Self::ai()),
            _ => None,
        }
    }
}

fn uci_derived_features() -> Vec<DerivedFeature> {
    use DerivedFeature::*;
    let s = |v: &str| v.to_string();
    let term = |column: &str, weight| WeightedTerm { column: s(column), weight };
    vec![
        Mean { name: s("family_education"), columns: vec![s("Medu"), s("Fedu")] },
        AbsDiff { name: s("parent_education_gap"), left: s("Medu"), right: s("Fedu") },
        Ratio { name: s("study_efficiency"), numerator: s("studytime"), denominator: s("traveltime"), offset: 1.0 },
        Ratio { name: s("time_management"), numerator: s("studytime"), denominator: s("freetime"), offset: 1.0 },
        Ratio { name: s("social_study_balance"), numerator: s("studytime"), denominator: s("goout"), offset: 1.0 },
        Exceeds { name: s("has_failures"), column: s("failures"), threshold: 0.0 },
        Matches { name: s("school_support"), column: s("schoolsup"), value: s("yes") },
        Matches { name: s("family_support"), column: s("famsup"), value: s("yes") },
        Matches { name: s("paid_classes"), column: s("paid"), value: s("yes") },
        WeightedSum {
            name: s("total_support"),
            terms: vec![term("school_support", 1.0), term("family_support", 1.0), term("paid_classes", 1.0)],
            bias: 0.0,
        },
        Affine { name: s("family_relationship_quality"), column: s("famrel"), scale: 0.2, offset: 0.0 },
        WeightedSum {
            name: s("avg_alcohol_consumption"),
            terms: vec![term("Dalc", 0.1), term("Walc", 0.1)],
            bias: 0.0,
        },
        Exceeds { name: s("excessive_socializing"), column: s("goout"), threshold: 4.0 },
        WeightedSum {
            name: s("social_risk"),
            terms: vec![
                term("avg_alcohol_consumption", 0.4),
                term("family_relationship_quality", -0.3),
                term("excessive_socializing", 0.3),
            ],
            bias: 0.3,
        },
        Affine { name: s("health_risk"), column: s("health"), scale: -0.2, offset: 1.0 },
        Matches { name: s("wants_higher_education"), column: s("higher"), value: s("yes") },
        Matches { name: s("has_internet"), column: s("internet"), value: s("yes") },
        Affine { name: s("age_maturity"), column: s("age"), scale: 1.0 / 7.0, offset: -15.0 / 7.0 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_validate() {
        for key in ["uci", "ou", "ai"] {
            let profile = SourceProfile::builtin(key).unwrap();
            profile.validate().unwrap();
        }
        assert!(SourceProfile::builtin("xyz").is_none());
    }

    #[test]
    fn test_resolve_cutoff() {
        let uci = SourceProfile::uci();
        assert_eq!(uci.resolve_cutoff("G3").unwrap(), Cutoff::Position(2));
        assert_eq!(uci.resolve_cutoff("1").unwrap(), Cutoff::Position(1));
        assert!(uci.resolve_cutoff("G9").is_err());

        let ou = SourceProfile::ou();
        assert_eq!(ou.resolve_cutoff("12").unwrap(), Cutoff::Week(12));
    }

    #[test]
    fn test_forbidden_set_covers_timeline_and_outcomes() {
        let ai = SourceProfile::ai();
        let forbidden = ai.forbidden_set();
        for column in ["Quiz ", "Final_Exam", "Total", "Grade", "target_score"] {
            assert!(forbidden.contains(column), "{} missing", column);
        }
    }

    #[test]
    fn test_validate_rejects_leaky_derived_feature() {
        let mut uci = SourceProfile::uci();
        uci.derived_features.push(DerivedFeature::Affine {
            name: "g3_scaled".to_string(),
            column: "G3".to_string(),
            scale: 0.05,
            offset: 0.0,
        });
        assert!(matches!(uci.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut ai = SourceProfile::ai();
        ai.binning = BinningPolicy::FixedThresholds {
            moderate_min: 80.0,
            strong_min: 70.0,
        };
        assert!(ai.validate().is_err());

        let mut ai = SourceProfile::ai();
        ai.test_fraction = 1.0;
        assert!(ai.validate().is_err());
    }

    #[test]
    fn test_profile_json_defaults() {
        let json = r#"{
            "name": "MINI",
            "layout": {"layout": "stacked", "files": [{"path": "mini.csv"}]},
            "timeline": [{"column": "q1", "position": 1}, {"column": "q2", "position": 2}],
            "default_cutoff": "1",
            "target": {"source": "next_assessment"},
            "binning": {"policy": "fixed_thresholds", "moderate_min": 50, "strong_min": 80}
        }"#;
        let profile: SourceProfile = serde_json::from_str(json).unwrap();
        profile.validate().unwrap();
        assert_eq!(profile.test_fraction, 0.2);
        assert_eq!(profile.iqr_multiplier, 1.5);
        assert_eq!(profile.split, SplitStrategy::RowLevel);
        assert_eq!(profile.forbidden_suffixes, vec!["_percentile".to_string()]);
        match profile.layout {
            SourceLayout::Stacked { delimiter, .. } => assert_eq!(delimiter, ','),
            _ => panic!("expected stacked layout"),
        }
    }
}
