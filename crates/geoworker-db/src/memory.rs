//! In-memory job store for tests and single-process embedding.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use geoworker_core::{
    Clock, Error, FailureOutcome, Job, JobStatus, JobStore, NewJob, QueueStats, Result,
    RetryPolicy, SystemClock,
};

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    /// Insertion order, used as the final ordering tie-break.
    seq: HashMap<Uuid, u64>,
    next_seq: u64,
    /// Every status a job has held, in order.
    history: HashMap<Uuid, Vec<JobStatus>>,
}

impl MemoryState {
    fn set_status(&mut self, job_id: Uuid, status: JobStatus) {
        self.history.entry(job_id).or_default().push(status);
    }

    /// The `processing` row, fenced to `claimed_at` when given.
    fn processing_job(
        &mut self,
        job_id: Uuid,
        claimed_at: Option<DateTime<Utc>>,
    ) -> Result<&mut Job> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if job.status != JobStatus::Processing {
            return Err(Error::InvalidTransition {
                job_id,
                expected: JobStatus::Processing,
                actual: job.status,
            });
        }
        if claimed_at.is_some_and(|at| at != job.updated_at) {
            return Err(Error::ClaimLost(job_id));
        }
        Ok(job)
    }

    fn apply_failure(
        &mut self,
        job_id: Uuid,
        claimed_at: Option<DateTime<Utc>>,
        error: &str,
        outcome: &FailureOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let job = self.processing_job(job_id, claimed_at)?;
        let status = match outcome {
            FailureOutcome::Retry { process_after, .. } => {
                job.process_after = Some(*process_after);
                JobStatus::Pending
            }
            FailureOutcome::Exhausted { .. } => {
                job.process_after = None;
                JobStatus::Failed
            }
        };
        job.status = status;
        job.retry_count = outcome.retry_count();
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        self.set_status(job_id, status);
        Ok(())
    }
}

/// [`JobStore`] kept in a mutex-guarded map.
///
/// Each operation holds the lock for its whole read-modify-write, which gives
/// the same single-row atomicity as the conditional updates of the PostgreSQL
/// store. Clones share the same jobs.
#[derive(Clone)]
pub struct MemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    /// Create an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            clock,
        }
    }

    /// Every status the job has held, starting with `pending`.
    pub async fn status_history(&self, job_id: Uuid) -> Vec<JobStatus> {
        self.state
            .lock()
            .await
            .history
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of jobs in the store.
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    /// Check if the store holds no jobs.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Uuid> {
        job.validate()?;

        let now = self.clock.now();
        let job_id = Uuid::now_v7();
        let mut state = self.state.lock().await;

        let seq = state.next_seq;
        state.next_seq += 1;
        state.seq.insert(job_id, seq);
        state.jobs.insert(
            job_id,
            Job {
                id: job_id,
                job_type: job.job_type,
                payload: job.payload,
                status: JobStatus::Pending,
                priority: job.priority,
                retry_count: 0,
                max_retries: job.max_retries,
                process_after: job.process_after,
                last_error: None,
                created_at: now,
                updated_at: now,
            },
        );
        state.set_status(job_id, JobStatus::Pending);
        Ok(job_id)
    }

    async fn fetch_ready(&self, job_types: &[String], limit: i64) -> Result<Vec<Job>> {
        let now = self.clock.now();
        let state = self.state.lock().await;

        let mut ready: Vec<&Job> = state
            .jobs
            .values()
            .filter(|job| job.is_ready(now))
            .filter(|job| job_types.is_empty() || job_types.contains(&job.job_type))
            .collect();

        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(state.seq.get(&a.id).cmp(&state.seq.get(&b.id)))
        });

        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(ready.into_iter().take(limit).cloned().collect())
    }

    async fn claim(&self, job_id: Uuid) -> Result<Option<Job>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let claimed = match state.jobs.get_mut(&job_id) {
            Some(job) if job.is_ready(now) => {
                job.status = JobStatus::Processing;
                job.updated_at = now;
                job.clone()
            }
            _ => return Ok(None),
        };
        state.set_status(job_id, JobStatus::Processing);
        Ok(Some(claimed))
    }

    async fn mark_completed(&self, job_id: Uuid, claimed_at: DateTime<Utc>) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let job = state.processing_job(job_id, Some(claimed_at))?;
        job.status = JobStatus::Completed;
        job.updated_at = now;
        state.set_status(job_id, JobStatus::Completed);
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
        let mut state = self.state.lock().await;

        let job = state.processing_job(job_id, Some(claimed_at))?;
        let outcome = policy.decide(job.retry_count, job.max_retries, retryable, now);
        state.apply_failure(job_id, Some(claimed_at), error, &outcome, now)?;
        Ok(outcome)
    }

    async fn requeue_stale(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<u64> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let stale: Vec<(Uuid, i32, i32)> = state
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Processing && job.updated_at < cutoff)
            .map(|job| (job.id, job.retry_count, job.max_retries))
            .collect();

        for (job_id, retry_count, max_retries) in &stale {
            let outcome = policy.decide(*retry_count, *max_retries, true, now);
            state.apply_failure(*job_id, None, error, &outcome, now)?;
        }
        Ok(stale.len() as u64)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(&job_id).cloned())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            stats.record(job.status, 1);
        }
        Ok(stats)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use geoworker_core::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn store_with_clock() -> (MemoryJobStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryJobStore::with_clock(Arc::new(clock.clone())), clock)
    }

    /// Claim `id` and return the claim token.
    async fn claim(store: &MemoryJobStore, id: Uuid) -> DateTime<Utc> {
        store.claim(id).await.unwrap().unwrap().updated_at
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_job() {
        let store = MemoryJobStore::new();
        let id = store
            .enqueue(NewJob::new("load_dataset").with_payload(json!({"dataset_input": "x.gpkg"})))
            .await
            .unwrap();

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.payload.unwrap()["dataset_input"], "x.gpkg");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_job() {
        let store = MemoryJobStore::new();
        let err = store.enqueue(NewJob::new("")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_fetch_ready_orders_by_priority_then_age() {
        let (store, clock) = store_with_clock();
        let low = store.enqueue(NewJob::new("a")).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let high_old = store.enqueue(NewJob::new("a").with_priority(5)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let high_new = store.enqueue(NewJob::new("a").with_priority(5)).await.unwrap();

        let ids: Vec<Uuid> = store
            .fetch_ready(&[], 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![high_old, high_new, low]);
    }

    #[tokio::test]
    async fn test_fetch_ready_same_instant_keeps_insertion_order() {
        let (store, _clock) = store_with_clock();
        let first = store.enqueue(NewJob::new("a")).await.unwrap();
        let second = store.enqueue(NewJob::new("a")).await.unwrap();

        let ids: Vec<Uuid> = store
            .fetch_ready(&[], 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn test_fetch_ready_filters_types_and_limit() {
        let store = MemoryJobStore::new();
        store.enqueue(NewJob::new("send_mail")).await.unwrap();
        store.enqueue(NewJob::new("load_dataset")).await.unwrap();
        store.enqueue(NewJob::new("load_dataset")).await.unwrap();

        let mail = store
            .fetch_ready(&["send_mail".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(mail.len(), 1);
        assert_eq!(mail[0].job_type, "send_mail");

        assert_eq!(store.fetch_ready(&[], 2).await.unwrap().len(), 2);
        assert!(store.fetch_ready(&[], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_ready_skips_future_process_after() {
        let (store, clock) = store_with_clock();
        let later = clock.now() + chrono::Duration::seconds(60);
        store
            .enqueue(NewJob::new("a").with_process_after(later))
            .await
            .unwrap();

        assert!(store.fetch_ready(&[], 10).await.unwrap().is_empty());
        clock.advance(Duration::from_secs(60));
        assert_eq!(store.fetch_ready(&[], 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(NewJob::new("a")).await.unwrap();

        let claimed = store.claim(id).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert!(store.claim(id).await.unwrap().is_none());
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_claim_unknown_job_is_false() {
        let store = MemoryJobStore::new();
        assert!(store.claim(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_single_winner() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(NewJob::new("a")).await.unwrap();

        let attempts = (0..16).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim(id).await.unwrap().is_some() })
        });
        let results = futures::future::join_all(attempts).await;
        let winners = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(winners, 1);
        assert_eq!(
            store.status_history(id).await,
            vec![JobStatus::Pending, JobStatus::Processing]
        );
    }

    #[tokio::test]
    async fn test_mark_completed_requires_processing() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(NewJob::new("a")).await.unwrap();

        let pending_at = store.get(id).await.unwrap().unwrap().updated_at;
        let err = store.mark_completed(id, pending_at).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                actual: JobStatus::Pending,
                ..
            }
        ));

        let claimed_at = claim(&store, id).await;
        store.mark_completed(id, claimed_at).await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 0);

        // Terminal: a second completion is rejected.
        assert!(store.mark_completed(id, claimed_at).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_completed_unknown_job() {
        let store = MemoryJobStore::new();
        let id = Uuid::now_v7();
        assert!(matches!(
            store.mark_completed(id, Utc::now()).await.unwrap_err(),
            Error::JobNotFound(missing) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_mark_failed_reschedules_with_backoff() {
        let (store, clock) = store_with_clock();
        let id = store.enqueue(NewJob::new("a")).await.unwrap();
        let claimed_at = claim(&store, id).await;

        let outcome = store
            .mark_failed(id, claimed_at, "boom", true, &RetryPolicy::default())
            .await
            .unwrap();
        assert!(outcome.is_retry());

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert_eq!(
            job.process_after,
            Some(clock.now() + chrono::Duration::seconds(30))
        );

        // Not claimable until the backoff elapses.
        assert!(store.claim(id).await.unwrap().is_none());
        clock.advance(Duration::from_secs(30));
        let reclaimed = store.claim(id).await.unwrap().unwrap();
        assert_eq!(reclaimed.attempt(), 2);
    }

    #[tokio::test]
    async fn test_mark_failed_exhausts_retries() {
        let store = MemoryJobStore::new();
        let id = store
            .enqueue(NewJob::new("a").with_max_retries(0))
            .await
            .unwrap();
        let claimed_at = claim(&store, id).await;

        let outcome = store
            .mark_failed(id, claimed_at, "fatal", true, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Exhausted { retry_count: 1 });

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 1);
        assert!(job.process_after.is_none());
        assert!(store.claim(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_failed_non_retryable() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(NewJob::new("a")).await.unwrap();
        let claimed_at = claim(&store, id).await;

        store
            .mark_failed(id, claimed_at, "bad payload", false, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_mark_failed_requires_processing() {
        let store = MemoryJobStore::new();
        let id = store.enqueue(NewJob::new("a")).await.unwrap();
        let err = store
            .mark_failed(id, Utc::now(), "x", true, &RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(store.get(id).await.unwrap().unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn test_requeue_stale_recovers_old_claims_only() {
        let (store, clock) = store_with_clock();
        let old = store.enqueue(NewJob::new("a")).await.unwrap();
        let fresh = store.enqueue(NewJob::new("a")).await.unwrap();

        claim(&store, old).await;
        clock.advance(Duration::from_secs(600));
        claim(&store, fresh).await;

        let cutoff = clock.now() - chrono::Duration::seconds(300);
        let recovered = store
            .requeue_stale(cutoff, "claim expired", &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let old_job = store.get(old).await.unwrap().unwrap();
        assert_eq!(old_job.status, JobStatus::Pending);
        assert_eq!(old_job.retry_count, 1);
        assert_eq!(old_job.last_error.as_deref(), Some("claim expired"));
        assert_eq!(
            store.get(fresh).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_requeue_stale_fails_exhausted_jobs() {
        let (store, clock) = store_with_clock();
        let id = store
            .enqueue(NewJob::new("a").with_max_retries(0))
            .await
            .unwrap();
        claim(&store, id).await;
        clock.advance(Duration::from_secs(10));

        store
            .requeue_stale(clock.now(), "claim expired", &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let store = MemoryJobStore::new();
        let a = store.enqueue(NewJob::new("a")).await.unwrap();
        store.enqueue(NewJob::new("a")).await.unwrap();
        claim(&store, a).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.total, 2);
    }

    #[tokio::test]
    async fn test_late_write_after_reclaim_is_rejected() {
        let (store, clock) = store_with_clock();
        let id = store.enqueue(NewJob::new("a")).await.unwrap();
        let policy = RetryPolicy::new(Duration::from_secs(30));

        // First holder stalls past the stale threshold and is recovered.
        let first = claim(&store, id).await;
        clock.advance(Duration::from_secs(100));
        let cutoff = clock.now() - chrono::Duration::seconds(20);
        assert_eq!(store.requeue_stale(cutoff, "claim expired", &policy).await.unwrap(), 1);

        // Second holder claims once the backoff has elapsed.
        clock.advance(Duration::from_secs(31));
        let second = claim(&store, id).await;
        assert_ne!(first, second);

        // The first holder finishing late changes nothing.
        let err = store
            .mark_failed(id, first, "late failure", true, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ClaimLost(lost) if lost == id));
        assert!(matches!(
            store.mark_completed(id, first).await.unwrap_err(),
            Error::ClaimLost(_)
        ));

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.last_error.as_deref(), Some("claim expired"));
        assert!(store.claim(id).await.unwrap().is_none());

        // The current holder still records normally.
        store.mark_completed(id, second).await.unwrap();
        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_claim_returns_current_attempt() {
        let (store, clock) = store_with_clock();
        let id = store.enqueue(NewJob::new("a")).await.unwrap();
        let snapshot = store.fetch_ready(&[], 10).await.unwrap().remove(0);
        assert_eq!(snapshot.attempt(), 1);

        // Another poller fails the job between this poller's fetch and claim.
        let claimed_at = claim(&store, id).await;
        store
            .mark_failed(id, claimed_at, "boom", true, &RetryPolicy::default())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(30));

        let claimed = store.claim(snapshot.id).await.unwrap().unwrap();
        assert_eq!(claimed.retry_count, 1);
        assert_eq!(claimed.attempt(), 2);
        assert_eq!(claimed.updated_at, clock.now());
    }
}
