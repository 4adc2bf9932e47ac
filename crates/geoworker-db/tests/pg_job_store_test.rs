//! Integration tests for PgJobStore.
//!
//! This test suite validates:
//! - Store-001: fetch_ready ordering, filtering and due-time handling
//! - Store-002: claim is a single-winner conditional update across pollers
//! - Store-003: mark_failed reschedules with backoff, then fails terminally
//! - Store-004: completion and failure writes require a processing row
//! - Store-005: stale processing rows are routed through the retry path
//! - Store-006: writes from a claim that was recovered and re-claimed are rejected
//!
//! NOTE: These tests need a PostgreSQL instance (DATABASE_URL, see
//! `test_fixtures`) and are ignored by default. Run with
//! `cargo test -p geoworker-db -- --ignored`.
//!
//! ISOLATION: each test namespaces its job types through `TestDatabase` and
//! always passes an explicit type filter to fetch_ready.

use std::sync::Arc;
use std::time::Duration;

use geoworker_db::test_fixtures::TestDatabase;
use geoworker_db::{
    Clock, Error, FailureOutcome, JobStatus, JobStore, ManualClock, NewJob, PgJobStore,
    RetryPolicy,
};
use serde_json::json;

async fn setup() -> TestDatabase {
    dotenvy::dotenv().ok();
    TestDatabase::new().await
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a reachable database
async fn test_enqueue_and_get() {
    let test_db = setup().await;
    let job_type = test_db.job_type("load_dataset");

    let id = test_db
        .db
        .jobs
        .enqueue(
            NewJob::new(&job_type)
                .with_payload(json!({"dataset_input": "bag.gpkg", "layer": ["pand"]}))
                .with_priority(3),
        )
        .await
        .unwrap();

    let job = test_db.db.jobs.get(id).await.unwrap().unwrap();
    assert_eq!(job.job_type, job_type);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.priority, 3);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.payload.unwrap()["layer"][0], "pand");

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a reachable database
async fn test_fetch_ready_order_and_filter() {
    let test_db = setup().await;
    let a = test_db.job_type("a");
    let b = test_db.job_type("b");
    let jobs = &test_db.db.jobs;

    let low = jobs.enqueue(NewJob::new(&a)).await.unwrap();
    let high = jobs.enqueue(NewJob::new(&a).with_priority(10)).await.unwrap();
    let other = jobs.enqueue(NewJob::new(&b).with_priority(20)).await.unwrap();
    jobs.enqueue(
        NewJob::new(&a)
            .with_priority(99)
            .with_process_after(chrono::Utc::now() + chrono::Duration::hours(1)),
    )
    .await
    .unwrap();

    let ready: Vec<_> = jobs
        .fetch_ready(&[a.clone()], 10)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(ready, vec![high, low]);

    let both: Vec<_> = jobs
        .fetch_ready(&[a.clone(), b.clone()], 10)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(both, vec![other, high, low]);

    assert_eq!(jobs.fetch_ready(&[a], 1).await.unwrap().len(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a reachable database
async fn test_concurrent_claim_single_winner() {
    let test_db = setup().await;
    let id = test_db
        .db
        .jobs
        .enqueue(NewJob::new(test_db.job_type("race")))
        .await
        .unwrap();

    // Two independent pollers sharing only the table.
    let poller_a = PgJobStore::new(test_db.db.pool.clone());
    let poller_b = PgJobStore::new(test_db.db.pool.clone());

    let (a, b) = tokio::join!(poller_a.claim(id), poller_b.claim(id));
    let winners = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|claimed| claimed.is_some())
        .count();
    assert_eq!(winners, 1);

    let job = test_db.db.jobs.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a reachable database
async fn test_retry_sequence_until_failed() {
    let clock = ManualClock::default();
    let test_db = TestDatabase::with_clock(Arc::new(clock.clone())).await;
    let jobs = &test_db.db.jobs;
    let policy = RetryPolicy::default();

    let id = jobs
        .enqueue(NewJob::new(test_db.job_type("flaky")).with_max_retries(2))
        .await
        .unwrap();

    for expected_retry in 1..=2 {
        let claimed = jobs.claim(id).await.unwrap().expect("claimable");
        assert_eq!(claimed.attempt(), expected_retry);
        let outcome = jobs
            .mark_failed(id, claimed.updated_at, "boom", true, &policy)
            .await
            .unwrap();
        assert!(outcome.is_retry());

        let job = jobs.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, expected_retry);
        assert!(jobs.claim(id).await.unwrap().is_none(), "claimable before backoff");

        clock.advance(policy.backoff_delay(expected_retry));
    }

    let claimed = jobs.claim(id).await.unwrap().expect("claimable");
    let outcome = jobs
        .mark_failed(id, claimed.updated_at, "boom", true, &policy)
        .await
        .unwrap();
    assert_eq!(outcome, FailureOutcome::Exhausted { retry_count: 3 });

    let job = jobs.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.last_error.as_deref(), Some("boom"));
    assert!(job.process_after.is_none());
    assert!(jobs.claim(id).await.unwrap().is_none());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a reachable database
async fn test_status_writes_require_processing() {
    let test_db = setup().await;
    let jobs = &test_db.db.jobs;
    let id = jobs
        .enqueue(NewJob::new(test_db.job_type("guard")))
        .await
        .unwrap();

    let pending_at = jobs.get(id).await.unwrap().unwrap().updated_at;
    let err = jobs.mark_completed(id, pending_at).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            actual: JobStatus::Pending,
            ..
        }
    ));

    let claimed_at = jobs.claim(id).await.unwrap().unwrap().updated_at;
    jobs.mark_completed(id, claimed_at).await.unwrap();

    let err = jobs
        .mark_failed(id, claimed_at, "late", true, &RetryPolicy::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            actual: JobStatus::Completed,
            ..
        }
    ));

    let missing = uuid::Uuid::now_v7();
    assert!(matches!(
        jobs.mark_completed(missing, claimed_at).await.unwrap_err(),
        Error::JobNotFound(_)
    ));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a reachable database
async fn test_requeue_stale() {
    // Start well in the past so the cutoff cannot reach rows other tests
    // are holding in processing right now.
    let clock = ManualClock::new(chrono::Utc::now() - chrono::Duration::days(30));
    let test_db = TestDatabase::with_clock(Arc::new(clock.clone())).await;
    let jobs = &test_db.db.jobs;

    let id = jobs
        .enqueue(NewJob::new(test_db.job_type("orphan")))
        .await
        .unwrap();
    assert!(jobs.claim(id).await.unwrap().is_some());

    clock.advance(Duration::from_secs(7200));
    let cutoff = clock.now() - chrono::Duration::seconds(3600);
    let recovered = jobs
        .requeue_stale(cutoff, "claim expired", &RetryPolicy::default())
        .await
        .unwrap();
    assert!(recovered >= 1);

    let job = jobs.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.last_error.as_deref(), Some("claim expired"));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with a reachable database
async fn test_late_write_after_reclaim_is_rejected() {
    let clock = ManualClock::new(chrono::Utc::now() - chrono::Duration::days(60));
    let test_db = TestDatabase::with_clock(Arc::new(clock.clone())).await;
    let jobs = &test_db.db.jobs;
    let policy = RetryPolicy::new(Duration::from_secs(30));

    let id = jobs
        .enqueue(NewJob::new(test_db.job_type("fenced")))
        .await
        .unwrap();
    let first = jobs.claim(id).await.unwrap().unwrap().updated_at;

    clock.advance(Duration::from_secs(100));
    let cutoff = clock.now() - chrono::Duration::seconds(20);
    jobs.requeue_stale(cutoff, "claim expired", &policy)
        .await
        .unwrap();

    clock.advance(Duration::from_secs(31));
    let second = jobs.claim(id).await.unwrap().unwrap();
    assert_eq!(second.attempt(), 2);

    let err = jobs
        .mark_failed(id, first, "late failure", true, &policy)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClaimLost(lost) if lost == id));
    assert!(matches!(
        jobs.mark_completed(id, first).await.unwrap_err(),
        Error::ClaimLost(_)
    ));

    let job = jobs.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.retry_count, 1);

    jobs.mark_completed(id, second.updated_at).await.unwrap();
    assert_eq!(
        jobs.get(id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );

    test_db.cleanup().await;
}
