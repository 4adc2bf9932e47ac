//! Routes a claimed job to its registered handler.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use geoworker_core::Error;

use crate::handler::{JobContext, JobResult};
use crate::registry::HandlerRegistry;

/// What to do with a job whose type has no registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownJobTypePolicy {
    /// Fail the job permanently.
    #[default]
    Fail,
    /// Treat it as a retryable failure, in case a handler is deployed later.
    Retry,
}

impl UnknownJobTypePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownJobTypePolicy::Fail => "fail",
            UnknownJobTypePolicy::Retry => "retry",
        }
    }
}

impl fmt::Display for UnknownJobTypePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnknownJobTypePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(UnknownJobTypePolicy::Fail),
            "retry" => Ok(UnknownJobTypePolicy::Retry),
            other => Err(Error::InvalidInput(format!(
                "Unknown job type policy '{}' (expected 'fail' or 'retry')",
                other
            ))),
        }
    }
}

/// Message recorded on a job whose type has no handler.
pub fn unknown_job_type_message(job_type: &str) -> String {
    format!("No handler registered for job type: {}", job_type)
}

/// Resolves handlers from a [`HandlerRegistry`] and invokes them.
///
/// A panicking handler is contained here and turned into a retryable failure.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    unknown_job_type: UnknownJobTypePolicy,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            unknown_job_type: UnknownJobTypePolicy::default(),
        }
    }

    pub fn with_unknown_job_type(mut self, policy: UnknownJobTypePolicy) -> Self {
        self.unknown_job_type = policy;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Invoke the handler for `ctx.job_type`.
    pub async fn dispatch(&self, ctx: JobContext) -> JobResult {
        let Some(handler) = self.registry.get(&ctx.job_type) else {
            warn!(
                subsystem = "jobs",
                component = "dispatcher",
                job_id = %ctx.job_id,
                job_type = %ctx.job_type,
                policy = %self.unknown_job_type,
                "No handler registered for job type"
            );
            let message = unknown_job_type_message(&ctx.job_type);
            return match self.unknown_job_type {
                UnknownJobTypePolicy::Fail => JobResult::Failed(message),
                UnknownJobTypePolicy::Retry => JobResult::Retry(message),
            };
        };

        let job_id = ctx.job_id;
        match AssertUnwindSafe(handler.execute(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    subsystem = "jobs",
                    component = "dispatcher",
                    %job_id,
                    job_type = handler.job_type(),
                    panic = %message,
                    "Job handler panicked"
                );
                JobResult::Retry(format!("Handler panicked: {}", message))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
