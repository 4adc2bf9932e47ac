//! Command-line interface.
//!
//! Worker tuning flags override the `JOB_*` environment variables read by
//! [`WorkerConfig::from_env`]; a flag that is not given leaves the
//! environment (or default) value in place.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use geoworker_jobs::{UnknownJobTypePolicy, WorkerConfig};
use serde_json::Value as JsonValue;

#[derive(Parser, Debug)]
#[command(name = "geoworker")]
#[command(author, version, about = "Persisted job queue worker")]
#[command(propagate_version = true)]
pub struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the queue and run jobs until interrupted
    Run(RunArgs),

    /// Queue a new job and print its id
    Enqueue(EnqueueArgs),

    /// Print job counts per status as JSON
    Stats,

    /// Apply database migrations
    Migrate,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// YAML file mapping job types to commands
    #[arg(long, env = "GEOWORKER_HANDLERS")]
    pub handlers: PathBuf,

    /// Seconds between the starts of two cycles
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,

    /// Maximum number of jobs running at once
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub run_once: bool,

    /// Per-job deadline in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Only poll for these job types (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub job_types: Vec<String>,

    /// Maximum candidates fetched per cycle
    #[arg(long)]
    pub fetch_limit: Option<i64>,

    /// First retry delay in seconds
    #[arg(long, value_name = "SECS")]
    pub retry_base_delay: Option<u64>,

    /// Upper bound on the retry delay in seconds
    #[arg(long, value_name = "SECS")]
    pub retry_max_delay: Option<u64>,

    /// Age in seconds after which a claimed job is considered orphaned
    #[arg(long, value_name = "SECS")]
    pub stale_after: Option<u64>,

    /// Do not recover orphaned claims
    #[arg(long)]
    pub no_reaper: bool,

    /// What to do with jobs whose type has no handler: fail or retry
    #[arg(long, value_name = "POLICY")]
    pub unknown_job_type: Option<UnknownJobTypePolicy>,

    /// Apply migrations before starting
    #[arg(long)]
    pub migrate: bool,

    /// Pool size override (defaults to max_concurrent + 2)
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Seconds a query waits for a free pool connection
    #[arg(long, value_name = "SECS", env = "DATABASE_ACQUIRE_TIMEOUT_SECS")]
    pub db_acquire_timeout: Option<u64>,
}

impl RunArgs {
    /// Apply the flags that were given on top of `base`.
    pub fn worker_config(&self, base: WorkerConfig) -> WorkerConfig {
        let mut config = base;
        if let Some(secs) = self.poll_interval {
            config = config.with_poll_interval(Duration::from_secs(secs));
        }
        if let Some(max) = self.max_concurrent {
            config = config.with_max_concurrent(max);
        }
        if self.run_once {
            config = config.with_run_once(true);
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        let job_types: Vec<&String> = self
            .job_types
            .iter()
            .filter(|t| !t.trim().is_empty())
            .collect();
        if !job_types.is_empty() {
            config = config.with_job_types(job_types.into_iter().map(|t| t.trim().to_string()));
        }
        if let Some(limit) = self.fetch_limit {
            config = config.with_fetch_limit(limit);
        }
        if let Some(secs) = self.retry_base_delay {
            config = config.with_retry_base_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = self.retry_max_delay {
            config = config.with_retry_max_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = self.stale_after {
            config = config.with_stale_after(Duration::from_secs(secs));
        }
        if self.no_reaper {
            config = config.with_reaper_enabled(false);
        }
        if let Some(policy) = self.unknown_job_type {
            config = config.with_unknown_job_type(policy);
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Job type to queue
    pub job_type: String,

    /// Payload as a JSON object
    #[arg(long, value_parser = parse_payload)]
    pub payload: Option<JsonValue>,

    /// Higher values are claimed first
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,

    /// Failed attempts allowed before the job is marked failed
    #[arg(long)]
    pub max_retries: Option<i32>,

    /// Seconds to wait before the job becomes eligible
    #[arg(long, value_name = "SECS")]
    pub delay: Option<u64>,
}

fn parse_payload(value: &str) -> Result<JsonValue, String> {
    let payload: JsonValue =
        serde_json::from_str(value).map_err(|e| format!("invalid JSON: {}", e))?;
    if !payload.is_object() {
        return Err("payload must be a JSON object".to_string());
    }
    Ok(payload)
}
