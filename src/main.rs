//! Command-line entry point: batch preprocessing and the transform server

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use weakness_ml::api::{router, AppState};
use weakness_ml::batch::{run_batch, DatasetSelection, SourceJob};
use weakness_ml::{PipelineConfig, SourceProfile};

#[derive(Parser)]
#[command(name = "weakness-ml", version, about = "Leakage-safe preprocessing of student records")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Preprocess one or all sources and write the artifacts.
    Preprocess {
        #[arg(long, default_value = "all")]
        dataset: DatasetSelection,
        /// Named prediction point, e.g. G3, midterm or 8.
        #[arg(long)]
        cutoff: Option<String>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        #[arg(long, default_value = "processed_data")]
        output_dir: PathBuf,
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,
        /// JSON profile replacing the built-in profile of the same name.
        #[arg(long)]
        profile: Vec<PathBuf>,
    },
    /// Serve persisted preprocessors over HTTP.
    Serve {
        #[arg(long, default_value = "processed_data")]
        artifacts_dir: PathBuf,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Preprocess {
            dataset,
            cutoff,
            seed,
            data_dir,
            output_dir,
            reports_dir,
            profile,
        } => {
            let mut jobs: Vec<SourceJob> = dataset
                .keys()
                .iter()
                .filter_map(|key| SourceJob::builtin(key, cutoff.clone()))
                .collect();
            for path in profile {
                let custom = SourceProfile::from_json_file(&path)
                    .with_context(|| format!("loading profile {}", path.display()))?;
                let job = SourceJob {
                    profile: custom,
                    prediction_point: cutoff.clone(),
                };
                match jobs
                    .iter_mut()
                    .find(|j| j.profile.name.eq_ignore_ascii_case(&job.profile.name))
                {
                    Some(existing) => *existing = job,
                    None => jobs.push(job),
                }
            }

            let config = PipelineConfig {
                data_dir,
                output_dir,
                reports_dir,
                seed,
            };
            tracing::info!("preprocessing {} source(s) with seed {}", jobs.len(), seed);
            let outcome = run_batch(jobs, config).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(ExitCode::from(outcome.status().exit_code()))
        }
        Command::Serve { artifacts_dir, port } => {
            let state = AppState::discover(&artifacts_dir)
                .with_context(|| format!("loading artifacts from {}", artifacts_dir.display()))?;
            if state.datasets().is_empty() {
                tracing::warn!("no preprocessors found in {}", artifacts_dir.display());
            }

            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {}", addr))?;
            tracing::info!("Server listening on http://{}", addr);
            axum::serve(listener, router(state)).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
