//! Storage trait for the job queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Job, NewJob, QueueStats};
use crate::retry::{FailureOutcome, RetryPolicy};

/// Durable table of job records.
///
/// Every write touches a single row and is conditioned on that row's current
/// status, which is the only coordination between concurrent pollers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Queue a new `pending` job and return its id.
    async fn enqueue(&self, job: NewJob) -> Result<Uuid>;

    /// Pending jobs that are due, highest priority first, then oldest first.
    ///
    /// An empty `job_types` slice means "any type". At most `limit` rows.
    async fn fetch_ready(&self, job_types: &[String], limit: i64) -> Result<Vec<Job>>;

    /// Atomically move a job from `pending` to `processing`.
    ///
    /// Returns the claimed row, whose `updated_at` is the claim token passed
    /// to the completion and failure writes. `None` when the row is no longer
    /// pending (another poller won the race); that is a normal outcome, not an
    /// error.
    async fn claim(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Mark a `processing` job as `completed`.
    ///
    /// Fails with [`Error::ClaimLost`](crate::Error::ClaimLost) when the row
    /// was reclaimed since `claimed_at`.
    async fn mark_completed(&self, job_id: Uuid, claimed_at: DateTime<Utc>) -> Result<()>;

    /// Record a failed attempt of a `processing` job held since `claimed_at`.
    ///
    /// Re-reads the retry counters, applies `policy` and writes either the
    /// rescheduled `pending` row or the terminal `failed` row.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        retryable: bool,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome>;

    /// Route `processing` jobs last touched before `cutoff` through the retry
    /// path with `error` as their failure message. Returns how many rows were
    /// recovered.
    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<u64>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// Count jobs by status.
    async fn stats(&self) -> Result<QueueStats>;
}

/// Message recorded on a job recovered by [`JobStore::requeue_stale`].
pub fn stale_claim_message(stale_after_secs: i64) -> String {
    format!(
        "Job claim expired after {} seconds without completion",
        stale_after_secs
    )
}
