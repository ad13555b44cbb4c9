//! Weakness ML - leakage-safe preprocessing of student performance records

pub mod api;
pub mod batch;
pub mod data;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod preprocessing;
pub mod profile;
pub mod report;
pub mod types;

pub use error::{PipelineError, Result};
pub use pipeline::{FittedPreprocessor, PipelineConfig, PipelineOutcome, PreprocessingPipeline};
pub use profile::SourceProfile;
pub use report::PreprocessingReport;
pub use types::*;
