//! Multi-source orchestration with continue-on-error semantics

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::PipelineError;
use crate::output::{persist, ArtifactPaths};
use crate::pipeline::{PipelineConfig, PreprocessingPipeline};
use crate::profile::SourceProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSelection {
    Uci,
    Ou,
    Ai,
    All,
}

impl DatasetSelection {
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            DatasetSelection::Uci => &["uci"],
            DatasetSelection::Ou => &["ou"],
            DatasetSelection::Ai => &["ai"],
            DatasetSelection::All => &["uci", "ou", "ai"],
        }
    }
}

impl FromStr for DatasetSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uci" => Ok(DatasetSelection::Uci),
            "ou" => Ok(DatasetSelection::Ou),
            "ai" => Ok(DatasetSelection::Ai),
            "all" => Ok(DatasetSelection::All),
            other => Err(format!("unknown dataset {:?} (expected uci, ou, ai or all)", other)),
        }
    }
}

impl fmt::Display for DatasetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keys().join(","))
    }
}

/// One source to run: its profile plus an optional prediction point override.
#[derive(Debug, Clone)]
pub struct SourceJob {
    pub profile: SourceProfile,
    pub prediction_point: Option<String>,
}

impl SourceJob {
    pub fn builtin(key: &str, prediction_point: Option<String>) -> Option<Self> {
        SourceProfile::builtin(key).map(|profile| Self {
            profile,
            prediction_point,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceResult {
    Succeeded { dataset: String, artifacts: ArtifactPaths },
    Failed { dataset: String, kind: String, message: String },
}

impl SourceResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SourceResult::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    Partial,
    Failure,
}

impl BatchStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            BatchStatus::Success => 0,
            BatchStatus::Failure => 1,
            BatchStatus::Partial => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<SourceResult>,
}

impl BatchOutcome {
    pub fn status(&self) -> BatchStatus {
        let ok = self.results.iter().filter(|r| r.is_success()).count();
        if ok == self.results.len() && ok > 0 {
            BatchStatus::Success
        } else if ok == 0 {
            BatchStatus::Failure
        } else {
            BatchStatus::Partial
        }
    }
}

/// Runs and persists one source synchronously.
pub fn run_source(job: SourceJob, config: PipelineConfig) -> Result<ArtifactPaths, PipelineError> {
    let mut pipeline = PreprocessingPipeline::new(job.profile, config)?;
    if let Some(point) = job.prediction_point {
        pipeline = pipeline.with_prediction_point(point)?;
    }
    let outcome = pipeline.run()?;
    let config = pipeline.config();
    persist(&outcome, &config.output_dir, &config.reports_dir)
}

/// Runs every job on its own blocking task. A failing source is logged and
/// reported; the others keep running.
pub async fn run_batch(jobs: Vec<SourceJob>, config: PipelineConfig) -> BatchOutcome {
    let handles: Vec<_> = jobs
        .into_iter()
        .map(|job| {
            let dataset = job.profile.name.clone();
            let config = config.clone();
            let handle = tokio::task::spawn_blocking(move || run_source(job, config));
            (dataset, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (dataset, handle) in handles {
        let result = match handle.await {
            Ok(Ok(artifacts)) => {
                tracing::info!("{}: completed", dataset);
                SourceResult::Succeeded { dataset, artifacts }
            }
            Ok(Err(e)) => {
                tracing::error!("{}: failed ({}): {}", dataset, e.kind(), e);
                SourceResult::Failed {
                    dataset,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!("{}: task aborted: {}", dataset, e);
                SourceResult::Failed {
                    dataset,
                    kind: "panic".to_string(),
                    message: e.to_string(),
                }
            }
        };
        results.push(result);
    }

    let outcome = BatchOutcome { results };
    tracing::info!("batch finished: {:?}", outcome.status());
    outcome
}
