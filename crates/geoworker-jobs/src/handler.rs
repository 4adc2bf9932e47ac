//! Handler contract for job types.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use geoworker_core::Job;

/// Context provided to job handlers.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub job_type: String,
    /// The job's payload; an empty object when the row has none.
    pub payload: JsonValue,
    /// One-based attempt number.
    pub attempt: i32,
}

impl JobContext {
    /// Build the context for the attempt a claim of `job` starts.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload_or_empty(),
            attempt: job.attempt(),
        }
    }

    /// Get a top-level payload field.
    pub fn payload_field(&self, key: &str) -> Option<&JsonValue> {
        self.payload.get(key)
    }

    /// Get a top-level payload field as a string.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload_field(key).and_then(JsonValue::as_str)
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully.
    Success,
    /// Job failed and may be attempted again after backoff.
    Retry(String),
    /// Job failed permanently.
    Failed(String),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success)
    }

    /// Whether a failure may be rescheduled.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobResult::Retry(_))
    }

    /// The failure message, if this is a failure.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            JobResult::Success => None,
            JobResult::Retry(message) | JobResult::Failed(message) => Some(message),
        }
    }
}

/// Trait for job handlers.
///
/// Handlers report their outcome through [`JobResult`] and never write their
/// own job row; the worker records the outcome.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> &str;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: &str) -> bool {
        self.job_type() == job_type
    }
}

/// Handler that succeeds without doing anything.
pub struct NoOpHandler {
    job_type: String,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        tracing::debug!(job_id = %ctx.job_id, job_type = %ctx.job_type, "No-op job");
        JobResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use geoworker_core::JobStatus;
    use serde_json::json;

    fn job(payload: Option<JsonValue>, retry_count: i32) -> Job {
        Job {
            id: Uuid::now_v7(),
            job_type: "refresh_models".to_string(),
            payload,
            status: JobStatus::Processing,
            priority: 0,
            retry_count,
            max_retries: 3,
            process_after: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_context_from_job() {
        let job = job(Some(json!({"dataset_input": "bag.gpkg"})), 2);
        let ctx = JobContext::from_job(&job);
        assert_eq!(ctx.job_id, job.id);
        assert_eq!(ctx.job_type, "refresh_models");
        assert_eq!(ctx.attempt, 3);
        assert_eq!(ctx.payload_str("dataset_input"), Some("bag.gpkg"));
        assert!(ctx.payload_field("missing").is_none());
    }

    #[test]
    fn test_context_missing_payload_is_empty_object() {
        let ctx = JobContext::from_job(&job(None, 0));
        assert_eq!(ctx.payload, json!({}));
        assert_eq!(ctx.attempt, 1);
    }

    #[test]
    fn test_job_result_helpers() {
        assert!(JobResult::Success.is_success());
        assert!(JobResult::Success.error_message().is_none());

        let retry = JobResult::Retry("upstream busy".into());
        assert!(retry.is_retryable());
        assert_eq!(retry.error_message(), Some("upstream busy"));

        let failed = JobResult::Failed("bad input".into());
        assert!(!failed.is_retryable());
        assert!(!failed.is_success());
        assert_eq!(failed.error_message(), Some("bad input"));
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new("refresh_models");
        assert_eq!(handler.job_type(), "refresh_models");
        assert!(handler.can_handle("refresh_models"));
        assert!(!handler.can_handle("export_csv"));

        let result = handler.execute(JobContext::from_job(&job(None, 0))).await;
        assert_eq!(result, JobResult::Success);
    }
}
