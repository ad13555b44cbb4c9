/// Core data types shared by the pipeline stages

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the single label column in every emitted table.
pub const LABEL_COLUMN: &str = "weakness_level";
/// Continuous post-cutoff score materialized for the binner.
pub const TARGET_SCORE_COLUMN: &str = "target_score";
/// Terminal categorical outcome materialized for the binner.
pub const TARGET_OUTCOME_COLUMN: &str = "target_outcome";

/// Ordinal risk label. Codes are what ends up in `weakness_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeaknessLevel {
    Weak,
    Moderate,
    Strong,
}

impl WeaknessLevel {
    pub const ALL: [WeaknessLevel; 3] = [
        WeaknessLevel::Weak,
        WeaknessLevel::Moderate,
        WeaknessLevel::Strong,
    ];

    pub fn code(self) -> u8 {
        match self {
            WeaknessLevel::Weak => 0,
            WeaknessLevel::Moderate => 1,
            WeaknessLevel::Strong => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(WeaknessLevel::Weak),
            1 => Some(WeaknessLevel::Moderate),
            2 => Some(WeaknessLevel::Strong),
            _ => None,
        }
    }

    /// Reads a label back from a numeric table cell.
    pub fn from_value(value: f64) -> Option<Self> {
        if value.is_finite() && value.fract() == 0.0 && (0.0..=2.0).contains(&value) {
            Self::from_code(value as u8)
        } else {
            None
        }
    }
}

impl fmt::Display for WeaknessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeaknessLevel::Weak => write!(f, "weak"),
            WeaknessLevel::Moderate => write!(f, "moderate"),
            WeaknessLevel::Strong => write!(f, "strong"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Train,
    Test,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

/// One graded submission of an event-level source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentEvent {
    pub entity_id: String,
    pub assessment_id: String,
    /// Day ordinal relative to course start; `None` when the source leaves it blank.
    pub timestamp: Option<f64>,
    pub score: Option<f64>,
    pub weight: f64,
    pub kind: Option<String>,
    pub submitted: Option<f64>,
    pub banked: bool,
}

/// One day of learning-environment activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub entity_id: String,
    pub timestamp: Option<f64>,
    pub clicks: f64,
    pub activity_type: Option<String>,
}

/// Label counts keyed by label code, as written into reports.
pub type ClassDistribution = BTreeMap<String, usize>;

pub fn class_distribution<'a, I>(labels: I) -> ClassDistribution
where
    I: IntoIterator<Item = &'a WeaknessLevel>,
{
    let mut dist = ClassDistribution::new();
    for label in labels {
        *dist.entry(label.code().to_string()).or_insert(0) += 1;
    }
    dist
}
