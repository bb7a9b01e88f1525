//! Video styling worker binary.
//!
//! `vart-worker <job.json>` runs one job and prints its final status;
//! `vart-worker --health` prints the health report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vart_models::{Job, JobId, ProcessingParams};
use vart_worker::{
    health, spawn_sweeper, InMemoryJobStore, JobRunner, ProgressStore, StatusService,
    WorkerConfig,
};

/// Job request file contents.
#[derive(Debug, Deserialize)]
struct JobRequest {
    #[serde(default)]
    id: Option<JobId>,
    source_path: PathBuf,
    output_path: PathBuf,
    #[serde(flatten)]
    params: ProcessingParams,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let store = InMemoryJobStore::new();
    let progress = ProgressStore::new();
    let runner = JobRunner::new(config.clone(), Arc::new(store.clone()), progress.clone());

    let arg = std::env::args().nth(1);
    match arg.as_deref() {
        Some("--health") => {
            let report = health::check(
                &config.work_dir,
                &progress,
                runner.effects(),
                runner.media_io(),
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading job request {}", path))?;
            let request: JobRequest =
                serde_json::from_str(&raw).with_context(|| format!("parsing job request {}", path))?;

            let mut job = Job::new(request.source_path, request.output_path, request.params);
            if let Some(id) = request.id {
                job = job.with_id(id);
            }
            store.insert(job.clone());

            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let sweeper = spawn_sweeper(
                progress.clone(),
                config.progress_ttl,
                config.sweep_interval,
                shutdown_rx,
            );

            let handle = runner.submit(job.clone());
            let report = tokio::select! {
                report = handle => report.context("job task failed")?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    let _ = shutdown_tx.send(true);
                    bail!("interrupted while processing job {}", job.id);
                }
            };
            info!(
                "Job {} finished: {} after {} attempt(s)",
                report.job_id, report.status, report.attempts
            );

            let snapshot = StatusService::new(progress, Arc::new(store))
                .get_progress(&job.id)
                .await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);

            let _ = shutdown_tx.send(true);
            sweeper.await.ok();

            if !report.is_completed() {
                std::process::exit(1);
            }
        }
        None => bail!("usage: vart-worker <job.json> | --health"),
    }

    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("vart=info"))?;

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}
