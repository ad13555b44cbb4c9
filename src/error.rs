//! Pipeline error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by library components. Each source run either completes or
/// fails with one of these; recovery across sources happens in `batch`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing source file: {}", path.display())]
    MissingSourceFile { path: PathBuf },

    #[error("schema violation in {source_name}: {reason}")]
    SchemaViolation { source_name: String, reason: String },

    #[error("insufficient available data: {0}")]
    InsufficientAvailableData(String),

    #[error("insufficient class diversity: expected 3 weakness levels, found {found:?}")]
    InsufficientClassDiversity { found: Vec<u8> },

    #[error("leakage detected: entity overlap of {overlap} between train and test (e.g. {sample:?})")]
    LeakageDetected { overlap: usize, sample: Vec<String> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} not fitted")]
    NotFitted(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn schema(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::SchemaViolation {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable kind, used in batch summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MissingSourceFile { .. } => "missing_source_file",
            PipelineError::SchemaViolation { .. } => "schema_violation",
            PipelineError::InsufficientAvailableData(_) => "insufficient_available_data",
            PipelineError::InsufficientClassDiversity { .. } => "insufficient_class_diversity",
            PipelineError::LeakageDetected { .. } => "leakage_detected",
            PipelineError::InvalidConfig(_) => "invalid_config",
            PipelineError::NotFitted(_) => "not_fitted",
            PipelineError::Io(_) => "io",
            PipelineError::Csv(_) => "csv",
            PipelineError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
