//! geoworker - job queue worker

mod cli;
mod handlers;
mod logging;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use geoworker_db::{log_pool_metrics, Database, JobStore, NewJob, PoolConfig};
use geoworker_jobs::{WorkerBuilder, WorkerConfig, WorkerEvent};
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands, EnqueueArgs, RunArgs};
use crate::handlers::HandlerFile;
use crate::logging::LogSettings;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let _log_guard = logging::init(&LogSettings::from_env());

    let cli = Cli::parse();
    let database_url = cli
        .database_url
        .clone()
        .context("DATABASE_URL is not set (use --database-url or the environment)")?;

    match cli.command {
        Commands::Run(args) => run(&database_url, args).await,
        Commands::Enqueue(args) => enqueue(&database_url, args).await,
        Commands::Stats => {
            let db = Database::connect(&database_url).await?;
            let stats = db.jobs.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Migrate => {
            let db = Database::connect(&database_url).await?;
            db.migrate().await?;
            info!(subsystem = "cli", op = "migrate", "Migrations applied");
            Ok(())
        }
    }
}

async fn run(database_url: &str, args: RunArgs) -> Result<()> {
    let config = args.worker_config(WorkerConfig::from_env());
    config.validate()?;

    let registry = HandlerFile::load(&args.handlers)?.into_registry();

    let mut pool_config = PoolConfig::for_worker(config.max_concurrent);
    if let Some(max) = args.max_connections {
        pool_config = pool_config.with_max_connections(max);
    }
    if let Some(secs) = args.db_acquire_timeout {
        pool_config = pool_config.with_acquire_timeout(Duration::from_secs(secs));
    }
    let db = Database::connect_with_config(database_url, pool_config).await?;
    if args.migrate {
        db.migrate().await?;
    }
    log_pool_metrics(db.pool());

    info!(
        subsystem = "cli",
        handlers = ?registry.job_types(),
        poll_interval_secs = config.poll_interval.as_secs(),
        max_concurrent = config.max_concurrent,
        timeout_secs = config.timeout.as_secs(),
        run_once = config.run_once,
        "Starting worker"
    );

    let worker = WorkerBuilder::new(db.job_store())
        .with_config(config)
        .with_registry(registry)
        .build()?;

    let mut handle = worker.start();
    let events = tokio::spawn(log_events(handle.events()));

    tokio::select! {
        result = handle.wait() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!(subsystem = "cli", "Shutdown requested, finishing current cycle");
            if let Err(e) = handle.shutdown().await {
                warn!(subsystem = "cli", error = %e, "Worker already stopped");
            }
            handle.wait().await?;
        }
    }

    // The logger exits on WorkerStopped; give it a moment to drain.
    if tokio::time::timeout(Duration::from_secs(1), events).await.is_err() {
        warn!(subsystem = "cli", "Event logger did not finish");
    }
    Ok(())
}

/// Summarize cycles at info level; per-job detail is logged by the worker.
async fn log_events(mut events: tokio::sync::broadcast::Receiver<WorkerEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(WorkerEvent::CycleCompleted(report)) if !report.is_idle() => {
                info!(
                    subsystem = "cli",
                    recovered = report.recovered,
                    fetched = report.fetched,
                    claimed = report.claimed,
                    completed = report.completed,
                    retried = report.retried,
                    failed = report.failed,
                    "Cycle finished"
                );
            }
            Ok(WorkerEvent::WorkerStopped) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => {
                warn!(subsystem = "cli", skipped = n, "Event logger lagged");
            }
        }
    }
}

async fn enqueue(database_url: &str, args: EnqueueArgs) -> Result<()> {
    let mut job = NewJob::new(args.job_type).with_priority(args.priority);
    if let Some(payload) = args.payload {
        job = job.with_payload(payload);
    }
    if let Some(max_retries) = args.max_retries {
        job = job.with_max_retries(max_retries);
    }
    if let Some(secs) = args.delay {
        let delay = chrono::Duration::from_std(Duration::from_secs(secs))
            .context("delay is out of range")?;
        job = job.with_process_after(chrono::Utc::now() + delay);
    }
    job.validate()?;

    let db = Database::connect(database_url).await?;
    match db.jobs.enqueue(job).await {
        Ok(id) => {
            println!("{}", id);
            Ok(())
        }
        Err(e) => {
            error!(subsystem = "cli", op = "enqueue", error = %e, "Failed to queue job");
            Err(e.into())
        }
    }
}
