//! PostgreSQL job store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use geoworker_core::{
    Clock, Error, FailureOutcome, Job, JobStatus, JobStore, NewJob, QueueStats, Result,
    RetryPolicy, SystemClock,
};

const JOB_COLUMNS: &str = "id, job_type, payload, status, priority, retry_count, max_retries,
     process_after, last_error, created_at, updated_at";

/// PostgreSQL implementation of [`JobStore`] over the `worker_jobs` table.
///
/// Timestamps are taken from the injected clock and bound as parameters, so
/// every poller agrees with its own notion of "now" rather than the server's.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
    clock: Arc<dyn Clock>,
}

impl PgJobStore {
    /// Create a store using the system clock.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(pool: Pool<Postgres>, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: &PgRow) -> Result<Job> {
        let status: String = row.try_get("status")?;
        Ok(Job {
            id: row.try_get("id")?,
            job_type: row.try_get("job_type")?,
            payload: row.try_get("payload")?,
            status: status.parse()?,
            priority: row.try_get("priority")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            process_after: row.try_get("process_after")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Explain why a fenced write on a `processing` row matched nothing.
    async fn transition_error(&self, job_id: Uuid) -> Error {
        let status: std::result::Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT status FROM worker_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await;

        match status {
            Ok(None) => Error::JobNotFound(job_id),
            Ok(Some(actual)) => match actual.parse::<JobStatus>() {
                // Still processing, so the row was reclaimed since our claim.
                Ok(JobStatus::Processing) => Error::ClaimLost(job_id),
                Ok(actual) => Error::InvalidTransition {
                    job_id,
                    expected: JobStatus::Processing,
                    actual,
                },
                Err(e) => e,
            },
            Err(e) => Error::Database(e),
        }
    }

    /// Write the outcome decided by the retry policy, conditioned on the row
    /// still being `processing` and untouched since `seen_at`.
    async fn write_failure<'e, E>(
        executor: E,
        job_id: Uuid,
        error: &str,
        outcome: &FailureOutcome,
        now: DateTime<Utc>,
        seen_at: DateTime<Utc>,
    ) -> Result<u64>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let (status, process_after) = match outcome {
            FailureOutcome::Retry { process_after, .. } => (JobStatus::Pending, Some(*process_after)),
            FailureOutcome::Exhausted { .. } => (JobStatus::Failed, None),
        };

        let result = sqlx::query(
            "UPDATE worker_jobs
             SET status = $2, retry_count = $3, last_error = $4, process_after = $5,
                 updated_at = $6
             WHERE id = $1 AND status = 'processing' AND updated_at = $7",
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(outcome.retry_count())
        .bind(error)
        .bind(process_after)
        .bind(now)
        .bind(seen_at)
        .execute(executor)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid> {
        job.validate()?;

        let job_id = Uuid::now_v7();
        let now = self.clock.now();

        sqlx::query(
            "INSERT INTO worker_jobs
                 (id, job_type, payload, status, priority, retry_count, max_retries,
                  process_after, created_at, updated_at)
             VALUES ($1, $2, $3, 'pending', $4, 0, $5, $6, $7, $7)",
        )
        .bind(job_id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.max_retries)
        .bind(job.process_after)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(subsystem = "db", component = "store", op = "enqueue", %job_id, job_type = %job.job_type, "Job queued");
        Ok(job_id)
    }

    async fn fetch_ready(&self, job_types: &[String], limit: i64) -> Result<Vec<Job>> {
        let now = self.clock.now();

        let query = format!(
            "SELECT {JOB_COLUMNS}
             FROM worker_jobs
             WHERE status = 'pending'
               AND (process_after IS NULL OR process_after <= $1)
               AND (cardinality($2::text[]) = 0 OR job_type = ANY($2))
             ORDER BY priority DESC, created_at ASC, id ASC
             LIMIT $3"
        );

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(job_types)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter().map(Self::parse_job_row).collect()
    }

    async fn claim(&self, job_id: Uuid) -> Result<Option<Job>> {
        let now = self.clock.now();

        // RETURNING gives the stored (microsecond) updated_at, the claim token.
        let query = format!(
            "UPDATE worker_jobs
             SET status = 'processing', updated_at = $2
             WHERE id = $1 AND status = 'pending'
               AND (process_after IS NULL OR process_after <= $2)
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn mark_completed(&self, job_id: Uuid, claimed_at: DateTime<Utc>) -> Result<()> {
        let now = self.clock.now();

        let result = sqlx::query(
            "UPDATE worker_jobs
             SET status = 'completed', updated_at = $2
             WHERE id = $1 AND status = 'processing' AND updated_at = $3",
        )
        .bind(job_id)
        .bind(now)
        .bind(claimed_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(job_id).await);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        retryable: bool,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome> {
        let now = self.clock.now();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Fresh read under a row lock; nothing else may touch the counters
        // between this read and the write below.
        let row: Option<(String, i32, i32, DateTime<Utc>)> = sqlx::query_as(
            "SELECT status, retry_count, max_retries, updated_at
             FROM worker_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let (status, retry_count, max_retries, updated_at) =
            row.ok_or(Error::JobNotFound(job_id))?;
        let status: JobStatus = status.parse()?;
        if status != JobStatus::Processing {
            return Err(Error::InvalidTransition {
                job_id,
                expected: JobStatus::Processing,
                actual: status,
            });
        }
        if updated_at != claimed_at {
            return Err(Error::ClaimLost(job_id));
        }

        let outcome = policy.decide(retry_count, max_retries, retryable, now);
        Self::write_failure(&mut *tx, job_id, error, &outcome, now, claimed_at).await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(outcome)
    }

    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<u64> {
        let now = self.clock.now();

        let stale: Vec<(Uuid, i32, i32, DateTime<Utc>)> = sqlx::query_as(
            "SELECT id, retry_count, max_retries, updated_at
             FROM worker_jobs
             WHERE status = 'processing' AND updated_at < $1
             ORDER BY updated_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut recovered = 0u64;
        for (job_id, retry_count, max_retries, seen_at) in stale {
            let outcome = policy.decide(retry_count, max_retries, true, now);
            let affected =
                Self::write_failure(&self.pool, job_id, error, &outcome, now, seen_at)
                    .await?;
            if affected == 0 {
                // Finished or recovered by someone else since the scan.
                continue;
            }
            warn!(
                subsystem = "db",
                component = "reaper",
                %job_id,
                retry_count = outcome.retry_count(),
                rescheduled = outcome.is_retry(),
                "Recovered stale processing job"
            );
            recovered += 1;
        }

        Ok(recovered)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM worker_jobs WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM worker_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;

        let mut stats = QueueStats::default();
        for (status, count) in rows {
            stats.record(status.parse()?, count);
        }
        Ok(stats)
    }
}
