//! Execution deadline for handler invocations.

use std::future::Future;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::handler::JobResult;

/// Message recorded on a job whose handler overran its deadline.
pub fn timeout_message(timeout_secs: u64) -> String {
    format!("Job execution timed out after {} seconds", timeout_secs)
}

/// Runs a handler future under a deadline.
///
/// At the deadline the future is dropped, which cancels it at its next await
/// point. Blocking work or tasks the handler detached are not stopped.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    timeout: Duration,
}

impl TimeoutSupervisor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Await `execution`, or return a retryable timeout failure at the deadline.
    pub async fn supervise<F>(&self, job_id: Uuid, execution: F) -> JobResult
    where
        F: Future<Output = JobResult>,
    {
        match tokio::time::timeout(self.timeout, execution).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    subsystem = "jobs",
                    component = "supervisor",
                    %job_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Job exceeded timeout"
                );
                JobResult::Retry(timeout_message(self.timeout.as_secs()))
            }
        }
    }
}
