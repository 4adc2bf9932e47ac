//! Job worker and poll loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use geoworker_core::{
    defaults, stale_claim_message, Clock, Error, FailureOutcome, Job, JobStore, Result,
    RetryPolicy, SystemClock,
};

use crate::dispatcher::{Dispatcher, UnknownJobTypePolicy};
use crate::handler::{JobContext, JobHandler, JobResult};
use crate::registry::HandlerRegistry;
use crate::supervisor::TimeoutSupervisor;

/// Configuration for the job worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Target time between the starts of two cycles.
    pub poll_interval: Duration,
    /// Maximum number of concurrently executing jobs.
    pub max_concurrent: usize,
    /// Exit after the first cycle.
    pub run_once: bool,
    /// Deadline for one handler invocation.
    pub timeout: Duration,
    /// Job types to poll for. Empty means every registered type.
    pub job_types: Vec<String>,
    /// Maximum candidates fetched per cycle.
    pub fetch_limit: i64,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Option<Duration>,
    /// Age after which a `processing` row is considered orphaned.
    /// `None` means a multiple of `timeout`.
    pub stale_after: Option<Duration>,
    /// Whether each cycle recovers orphaned `processing` rows.
    pub reaper_enabled: bool,
    pub unknown_job_type: UnknownJobTypePolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(defaults::POLL_INTERVAL_SECS),
            max_concurrent: defaults::MAX_CONCURRENT,
            run_once: false,
            timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            job_types: Vec::new(),
            fetch_limit: defaults::FETCH_LIMIT,
            retry_base_delay: Duration::from_secs(defaults::RETRY_BASE_DELAY_SECS),
            retry_max_delay: None,
            stale_after: None,
            reaper_enabled: true,
            unknown_job_type: UnknownJobTypePolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_POLL_INTERVAL_SECS` | `30` | Seconds between cycle starts |
    /// | `JOB_MAX_CONCURRENT` | `3` | Max concurrent jobs |
    /// | `JOB_RUN_ONCE` | `false` | Exit after one cycle |
    /// | `JOB_TIMEOUT_SECS` | `3600` | Per-job deadline |
    /// | `JOB_TYPES` | (all registered) | Comma-separated job type filter |
    /// | `JOB_FETCH_LIMIT` | `100` | Candidates fetched per cycle |
    /// | `JOB_RETRY_BASE_DELAY_SECS` | `30` | First backoff delay |
    /// | `JOB_RETRY_MAX_DELAY_SECS` | (none) | Backoff cap |
    /// | `JOB_STALE_AFTER_SECS` | 2 × timeout | Orphaned claim age |
    /// | `JOB_REAPER_ENABLED` | `true` | Recover orphaned claims |
    /// | `JOB_UNKNOWN_TYPE_POLICY` | `fail` | `fail` or `retry` |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`WorkerConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::default();
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let secs = |key: &str| {
            parsed(key)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
        };
        let flag = |key: &str| {
            parsed(key).map(|v| {
                let v = v.to_ascii_lowercase();
                !v.is_empty() && v != "false" && v != "0"
            })
        };

        Self {
            poll_interval: secs("JOB_POLL_INTERVAL_SECS").unwrap_or(base.poll_interval),
            max_concurrent: parsed("JOB_MAX_CONCURRENT")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(base.max_concurrent)
                .max(1),
            run_once: flag("JOB_RUN_ONCE").unwrap_or(base.run_once),
            timeout: secs("JOB_TIMEOUT_SECS").unwrap_or(base.timeout),
            job_types: parsed("JOB_TYPES")
                .map(|v| parse_job_types(&v))
                .unwrap_or_default(),
            fetch_limit: parsed("JOB_FETCH_LIMIT")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(base.fetch_limit),
            retry_base_delay: secs("JOB_RETRY_BASE_DELAY_SECS").unwrap_or(base.retry_base_delay),
            retry_max_delay: secs("JOB_RETRY_MAX_DELAY_SECS"),
            stale_after: secs("JOB_STALE_AFTER_SECS"),
            reaper_enabled: flag("JOB_REAPER_ENABLED").unwrap_or(base.reaper_enabled),
            unknown_job_type: parsed("JOB_UNKNOWN_TYPE_POLICY")
                .and_then(|v| v.parse().ok())
                .unwrap_or(base.unknown_job_type),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_job_types<I, S>(mut self, job_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job_types = job_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fetch_limit(mut self, limit: i64) -> Self {
        self.fetch_limit = limit;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub fn with_reaper_enabled(mut self, enabled: bool) -> Self {
        self.reaper_enabled = enabled;
        self
    }

    pub fn with_unknown_job_type(mut self, policy: UnknownJobTypePolicy) -> Self {
        self.unknown_job_type = policy;
        self
    }

    /// Staleness threshold the reaper uses, or `None` when it is disabled.
    pub fn effective_stale_after(&self) -> Option<Duration> {
        if !self.reaper_enabled {
            return None;
        }
        Some(self.stale_after.unwrap_or_else(|| {
            self.timeout
                .saturating_mul(defaults::STALE_AFTER_TIMEOUTS)
        }))
    }

    /// Backoff policy built from the retry settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.retry_base_delay);
        match self.retry_max_delay {
            Some(max_delay) => policy.with_max_delay(max_delay),
            None => policy,
        }
    }

    /// Reject settings the poll loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::Config("max_concurrent must be at least 1".into()));
        }
        if self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "max_concurrent must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        // Timeout and stale-claim messages are recorded in whole seconds.
        if self.timeout < Duration::from_secs(1) {
            return Err(Error::Config("timeout must be at least 1 second".into()));
        }
        if self.fetch_limit < 1 {
            return Err(Error::Config("fetch_limit must be at least 1".into()));
        }
        if self.job_types.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Config("job_types must not contain empty names".into()));
        }
        if let Some(stale_after) = self.effective_stale_after() {
            if stale_after <= self.timeout {
                return Err(Error::Config(format!(
                    "stale_after ({}s) must exceed timeout ({}s)",
                    stale_after.as_secs(),
                    self.timeout.as_secs()
                )));
            }
        }
        Ok(())
    }
}

/// Split a comma-separated job type list, dropping blanks.
pub fn parse_job_types(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Stale claims returned to the retry path.
    pub recovered: u64,
    /// Ready candidates returned by the store.
    pub fetched: usize,
    /// Candidates this worker claimed.
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Retried => self.retried += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::Unrecorded => {}
        }
    }

    /// Nothing was claimed or recovered.
    pub fn is_idle(&self) -> bool {
        self.claimed == 0 && self.recovered == 0
    }
}

/// Final state of one executed job, as far as the worker could record it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    Retried,
    Failed,
    /// The store write failed; the row is still `processing`.
    Unrecorded,
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// A claimed job was handed to its handler.
    JobStarted {
        job_id: Uuid,
        job_type: String,
        attempt: i32,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: Uuid,
        job_type: String,
        duration_ms: u64,
    },
    /// A job failed and was rescheduled.
    JobRetryScheduled {
        job_id: Uuid,
        job_type: String,
        retry_count: i32,
        process_after: DateTime<Utc>,
        error: String,
    },
    /// A job failed permanently.
    JobFailed {
        job_id: Uuid,
        job_type: String,
        retry_count: i32,
        error: String,
    },
    /// A cycle finished and every job it started was recorded.
    CycleCompleted(CycleReport),
    /// A cycle was aborted by a store error.
    CycleFailed { error: String },
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop before its next cycle.
    ///
    /// Jobs of the current cycle run to completion.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Whether the poll loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the poll loop to exit. Call at most once.
    pub async fn wait(&mut self) -> Result<()> {
        (&mut self.task)
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {}", e)))
    }
}

/// Job worker that processes jobs from a [`JobStore`].
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    runner: JobRunner,
    limiter: Arc<Semaphore>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a worker on the system clock.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry,
        config: WorkerConfig,
    ) -> Result<Self> {
        Self::with_clock(store, registry, config, Arc::new(SystemClock))
    }

    /// Create a worker reading time and sleeping through `clock`.
    pub fn with_clock(
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry,
        config: WorkerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(Error::Config("No job handlers registered".into()));
        }
        for job_type in &config.job_types {
            if !registry.contains(job_type) {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    %job_type,
                    "Polled job type has no registered handler"
                );
            }
        }

        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let dispatcher = Dispatcher::new(registry).with_unknown_job_type(config.unknown_job_type);
        let runner = JobRunner {
            store: store.clone(),
            dispatcher: Arc::new(dispatcher),
            supervisor: TimeoutSupervisor::new(config.timeout),
            retry_policy: config.retry_policy(),
            event_tx: event_tx.clone(),
        };

        Ok(Self {
            store,
            clock,
            limiter: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            runner,
            event_tx,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Job types this worker polls for: the configured filter, or every
    /// registered type.
    pub fn job_types(&self) -> Vec<String> {
        if self.config.job_types.is_empty() {
            self.runner.dispatcher.registry().job_types()
        } else {
            self.config.job_types.clone()
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run_until(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Drive the poll loop on the current task.
    ///
    /// Returns after one cycle in run-once mode; otherwise runs until the
    /// process exits. Use [`JobWorker::start`] for a stoppable worker.
    pub async fn run(&self) {
        let (_shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.run_until(&mut shutdown_rx).await;
    }

    /// Run a single cycle: reap, fetch, claim, execute, record.
    ///
    /// Returns after every job the cycle started has been recorded. Store
    /// errors while reaping, fetching or claiming abort the cycle.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        if let Some(stale_after) = self.config.effective_stale_after() {
            report.recovered = self.reap(stale_after).await?;
        }

        let job_types = self.job_types();
        let candidates = self
            .store
            .fetch_ready(&job_types, self.config.fetch_limit)
            .await?;
        report.fetched = candidates.len();

        let mut tasks = JoinSet::new();
        let mut abort = None;

        for job in candidates {
            // A slot is taken before the claim so a claimed job never waits.
            let permit = match self.limiter.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    abort = Some(Error::Internal(format!("Concurrency limiter closed: {}", e)));
                    break;
                }
            };

            match self.store.claim(job.id).await {
                Ok(Some(claimed)) => {
                    report.claimed += 1;
                    let runner = self.runner.clone();
                    tasks.spawn(async move {
                        let outcome = runner.execute(claimed).await;
                        drop(permit);
                        outcome
                    });
                }
                Ok(None) => {
                    debug!(
                        subsystem = "jobs",
                        component = "claimer",
                        job_id = %job.id,
                        "Job claimed by another poller, skipping"
                    );
                }
                Err(e) => {
                    abort = Some(e);
                    break;
                }
            }
        }

        // Jobs already started always run to their final write.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => error!(subsystem = "jobs", component = "worker", error = ?e, "Job task panicked"),
            }
        }

        match abort {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Return orphaned `processing` rows to the retry path.
    async fn reap(&self, stale_after: Duration) -> Result<u64> {
        let age = chrono::Duration::from_std(stale_after)
            .map_err(|e| Error::Config(format!("stale_after out of range: {}", e)))?;
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let message = stale_claim_message(i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX));

        let recovered = self
            .store
            .requeue_stale(cutoff, &message, &self.runner.retry_policy)
            .await?;
        if recovered > 0 {
            warn!(
                subsystem = "jobs",
                component = "reaper",
                recovered,
                stale_after_secs = stale_after.as_secs(),
                "Recovered stale job claims"
            );
        }
        Ok(recovered)
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run_until(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        info!(
            subsystem = "jobs",
            component = "worker",
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent = self.config.max_concurrent,
            timeout_secs = self.config.timeout.as_secs(),
            run_once = self.config.run_once,
            job_types = ?self.job_types(),
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "jobs", component = "worker", "Job worker received shutdown signal");
                break;
            }

            let started = self.clock.now();
            let pause = match self.run_once().await {
                Ok(report) => {
                    if report.is_idle() {
                        debug!(subsystem = "jobs", component = "worker", fetched = report.fetched, "No jobs claimed this cycle");
                    } else {
                        info!(
                            subsystem = "jobs",
                            component = "worker",
                            recovered = report.recovered,
                            fetched = report.fetched,
                            claimed = report.claimed,
                            completed = report.completed,
                            retried = report.retried,
                            failed = report.failed,
                            "Poll cycle completed"
                        );
                    }
                    let _ = self.event_tx.send(WorkerEvent::CycleCompleted(report));
                    let elapsed = (self.clock.now() - started)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    self.config.poll_interval.saturating_sub(elapsed)
                }
                Err(e) => {
                    error!(subsystem = "jobs", component = "worker", error = %e, "Poll cycle failed");
                    let _ = self.event_tx.send(WorkerEvent::CycleFailed {
                        error: e.to_string(),
                    });
                    self.config.poll_interval
                }
            };

            if self.config.run_once {
                break;
            }

            debug!(subsystem = "jobs", component = "worker", sleep_ms = pause.as_millis() as u64, "Sleeping until next cycle");
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(subsystem = "jobs", component = "worker", "Job worker received shutdown signal");
                    break;
                }
                _ = self.clock.sleep(pause) => {}
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", component = "worker", "Job worker stopped");
    }
}

/// Everything a spawned task needs to execute and record one job.
#[derive(Clone)]
struct JobRunner {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<Dispatcher>,
    supervisor: TimeoutSupervisor,
    retry_policy: RetryPolicy,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobRunner {
    /// Execute a single claimed job and record its outcome.
    ///
    /// `job` is the row returned by the claim; its `updated_at` fences the
    /// final write.
    async fn execute(self, job: Job) -> JobOutcome {
        let start = Instant::now();
        let ctx = JobContext::from_job(&job);
        let job_id = job.id;
        let claimed_at = job.updated_at;
        let job_type = job.job_type;
        let attempt = ctx.attempt;

        info!(subsystem = "jobs", component = "worker", %job_id, %job_type, attempt, "Processing job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            job_type: job_type.clone(),
            attempt,
        });

        let result = self
            .supervisor
            .supervise(job_id, self.dispatcher.dispatch(ctx))
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success => {
                self.record_success(job_id, claimed_at, job_type, duration_ms)
                    .await
            }
            JobResult::Retry(error) => {
                self.record_failure(job_id, claimed_at, job_type, error, true, duration_ms)
                    .await
            }
            JobResult::Failed(error) => {
                self.record_failure(job_id, claimed_at, job_type, error, false, duration_ms)
                    .await
            }
        }
    }

    async fn record_success(
        &self,
        job_id: Uuid,
        claimed_at: DateTime<Utc>,
        job_type: String,
        duration_ms: u64,
    ) -> JobOutcome {
        if let Err(e) = self.store.mark_completed(job_id, claimed_at).await {
            error!(subsystem = "jobs", component = "worker", error = %e, %job_id, "Failed to mark job as completed");
            return JobOutcome::Unrecorded;
        }

        info!(subsystem = "jobs", component = "worker", %job_id, %job_type, duration_ms, "Job completed successfully");
        let _ = self.event_tx.send(WorkerEvent::JobCompleted {
            job_id,
            job_type,
            duration_ms,
        });
        JobOutcome::Completed
    }

    async fn record_failure(
        &self,
        job_id: Uuid,
        claimed_at: DateTime<Utc>,
        job_type: String,
        error: String,
        retryable: bool,
        duration_ms: u64,
    ) -> JobOutcome {
        match self
            .store
            .mark_failed(job_id, claimed_at, &error, retryable, &self.retry_policy)
            .await
        {
            Ok(FailureOutcome::Retry {
                retry_count,
                delay,
                process_after,
            }) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    %job_id,
                    %job_type,
                    %error,
                    retry_count,
                    delay_secs = delay.as_secs(),
                    duration_ms,
                    "Job failed, retry scheduled"
                );
                let _ = self.event_tx.send(WorkerEvent::JobRetryScheduled {
                    job_id,
                    job_type,
                    retry_count,
                    process_after,
                    error,
                });
                JobOutcome::Retried
            }
            Ok(FailureOutcome::Exhausted { retry_count }) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    %job_id,
                    %job_type,
                    %error,
                    retry_count,
                    retryable,
                    duration_ms,
                    "Job failed permanently"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    job_type,
                    retry_count,
                    error,
                });
                JobOutcome::Failed
            }
            Err(e) => {
                error!(subsystem = "jobs", component = "worker", error = %e, %job_id, "Failed to record job failure");
                JobOutcome::Unrecorded
            }
        }
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    registry: HandlerRegistry,
    clock: Arc<dyn Clock>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            config: WorkerConfig::default(),
            registry: HandlerRegistry::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.registry.register(handler);
        self
    }

    /// Add every handler of `registry`.
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        for job_type in registry.job_types() {
            if let Some(handler) = registry.get(&job_type) {
                self.registry.register_arc(handler);
            }
        }
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and build the worker.
    pub fn build(self) -> Result<JobWorker> {
        JobWorker::with_clock(self.store, self.registry, self.config, self.clock)
    }
}
