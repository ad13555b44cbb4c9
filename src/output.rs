//! Artifact persistence with temp-file-then-rename writes

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::pipeline::{FittedPreprocessor, PipelineOutcome};

/// Source-qualified artifact locations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactPaths {
    pub train: PathBuf,
    pub test: PathBuf,
    pub imputation: PathBuf,
    pub encoders: PathBuf,
    pub outlier_bounds: PathBuf,
    pub scaler: PathBuf,
    pub report: PathBuf,
}

const SCALER_SUFFIX: &str = "_scaler.json";

impl ArtifactPaths {
    pub fn new(output_dir: &Path, reports_dir: &Path, dataset: &str) -> Self {
        let out = |suffix: &str| output_dir.join(format!("{}{}", dataset, suffix));
        Self {
            train: out("_train.csv"),
            test: out("_test.csv"),
            imputation: out("_imputation.json"),
            encoders: out("_encoders.json"),
            outlier_bounds: out("_outlier_bounds.json"),
            scaler: out(SCALER_SUFFIX),
            report: reports_dir.join(format!("{}_preprocessing_report.json", dataset)),
        }
    }
}

/// Writes through a hidden sibling file and renames it over `path`.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::InvalidConfig(format!("invalid artifact path {}", path.display())))?;
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    let result = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        write(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();
    match result {
        Ok(()) => {
            fs::rename(&tmp, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |w| {
        serde_json::to_writer_pretty(&mut *w, value)?;
        Ok(())
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(PipelineError::MissingSourceFile {
            path: path.to_path_buf(),
        });
    }
    Ok(serde_json::from_reader(std::io::BufReader::new(File::open(path)?))?)
}

/// Persists tables, fitted parameters and the report of one run.
pub fn persist(outcome: &PipelineOutcome, output_dir: &Path, reports_dir: &Path) -> Result<ArtifactPaths> {
    let paths = ArtifactPaths::new(output_dir, reports_dir, &outcome.report.dataset);
    write_atomic(&paths.train, |w| outcome.train.write_csv(w))?;
    write_atomic(&paths.test, |w| outcome.test.write_csv(w))?;
    write_json(&paths.imputation, &outcome.preprocessor.imputation)?;
    write_json(&paths.encoders, &outcome.preprocessor.encoding)?;
    write_json(&paths.outlier_bounds, &outcome.preprocessor.outliers)?;
    write_json(&paths.scaler, &outcome.preprocessor.scaling)?;
    write_json(&paths.report, &outcome.report)?;
    tracing::info!(
        "{}: artifacts written to {} and {}",
        outcome.report.dataset,
        output_dir.display(),
        paths.report.display()
    );
    Ok(paths)
}

/// Loads the fitted parameters persisted for `dataset`.
pub fn load_preprocessor(output_dir: &Path, dataset: &str) -> Result<FittedPreprocessor> {
    let paths = ArtifactPaths::new(output_dir, output_dir, dataset);
    Ok(FittedPreprocessor {
        dataset: dataset.to_string(),
        imputation: read_json(&paths.imputation)?,
        encoding: read_json(&paths.encoders)?,
        outliers: read_json(&paths.outlier_bounds)?,
        scaling: read_json(&paths.scaler)?,
    })
}

/// Datasets with a persisted scaler in `output_dir`, sorted by name.
pub fn discover_datasets(output_dir: &Path) -> Result<Vec<String>> {
    if !output_dir.is_dir() {
        return Err(PipelineError::MissingSourceFile {
            path: output_dir.to_path_buf(),
        });
    }
    let mut datasets = Vec::new();
    for entry in fs::read_dir(output_dir)? {
        let file_name = entry?.file_name();
        if let Some(dataset) = file_name.to_str().and_then(|n| n.strip_suffix(SCALER_SUFFIX)) {
            if !dataset.is_empty() && !dataset.starts_with('.') {
                datasets.push(dataset.to_string());
            }
        }
    }
    datasets.sort();
    Ok(datasets)
}
