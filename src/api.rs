//! HTTP surface: applies persisted preprocessors to novel records

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::data::table::{Column, Table};
use crate::error::{PipelineError, Result};
use crate::output::{discover_datasets, load_preprocessor};
use crate::pipeline::{ApplyStats, FittedPreprocessor};

#[derive(Clone, Default)]
pub struct AppState {
    preprocessors: Arc<BTreeMap<String, FittedPreprocessor>>,
}

impl AppState {
    pub fn new(preprocessors: impl IntoIterator<Item = FittedPreprocessor>) -> Self {
        let map = preprocessors
            .into_iter()
            .map(|p| (p.dataset.clone(), p))
            .collect();
        Self {
            preprocessors: Arc::new(map),
        }
    }

    /// Loads every dataset with a persisted scaler under `artifacts_dir`.
    pub fn discover(artifacts_dir: &Path) -> Result<Self> {
        let mut loaded = Vec::new();
        for dataset in discover_datasets(artifacts_dir)? {
            match load_preprocessor(artifacts_dir, &dataset) {
                Ok(p) => {
                    tracing::info!("loaded {} preprocessor ({} features)", dataset, p.feature_columns().len());
                    loaded.push(p);
                }
                Err(PipelineError::MissingSourceFile { path }) => {
                    tracing::warn!("{}: no artifacts ({} missing)", dataset, path.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Self::new(loaded))
    }

    pub fn datasets(&self) -> Vec<String> {
        self.preprocessors.keys().cloned().collect()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/datasets", get(datasets))
        .route("/api/transform", post(transform))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dataset: String,
    pub feature_columns: Vec<String>,
    pub encoded_columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransformRequest {
    pub dataset: String,
    pub records: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransformResponse {
    pub dataset: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub stats: ApplyStats,
}

type ApiError = (StatusCode, String);

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Weakness ML preprocessing API",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn datasets(State(state): State<AppState>) -> Json<Vec<DatasetInfo>> {
    Json(
        state
            .preprocessors
            .values()
            .map(|p| DatasetInfo {
                dataset: p.dataset.clone(),
                feature_columns: p.feature_columns().to_vec(),
                encoded_columns: p
                    .encoding
                    .columns
                    .iter()
                    .flat_map(|(column, encoding)| encoding.output_columns(column))
                    .collect(),
            })
            .collect(),
    )
}

async fn transform(
    State(state): State<AppState>,
    Json(request): Json<TransformRequest>,
) -> std::result::Result<Json<TransformResponse>, ApiError> {
    tracing::info!("transform request: {} records for {}", request.records.len(), request.dataset);

    let preprocessor = state
        .preprocessors
        .get(&request.dataset)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown dataset {}", request.dataset)))?;
    if request.records.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "no records provided".to_string()));
    }

    let table = records_to_table(&request.records);
    let (table, stats) = preprocessor
        .transform(table)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    let columns = table.names().to_vec();
    let values: Vec<&[f64]> = columns.iter().filter_map(|c| table.numeric(c)).collect();
    let rows = (0..table.n_rows())
        .map(|row| values.iter().map(|col| col[row]).collect())
        .collect();

    Ok(Json(TransformResponse {
        dataset: request.dataset,
        columns,
        rows,
        stats,
    }))
}

/// Builds a table with one row per JSON object. A field becomes numeric when
/// every present value is a number or a numeric string; nulls, empty strings
/// and absent fields are missing.
pub fn records_to_table(records: &[serde_json::Map<String, serde_json::Value>]) -> Table {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }

    let mut table = Table::new(records.len());
    for name in names {
        let cells: Vec<Option<&serde_json::Value>> = records
            .iter()
            .map(|r| r.get(&name).filter(|v| !v.is_null() && v.as_str() != Some("")))
            .collect();
        let numeric = cells.iter().flatten().all(|v| as_number(v).is_some());
        let column = if numeric {
            Column::Numeric(
                cells
                    .iter()
                    .map(|v| v.and_then(as_number).unwrap_or(f64::NAN))
                    .collect(),
            )
        } else {
            Column::Text(
                cells
                    .iter()
                    .map(|v| {
                        v.map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                    })
                    .collect(),
            )
        };
        table.set_column(name, column);
    }
    table
}

fn as_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}
