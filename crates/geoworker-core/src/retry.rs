//! Retry policy: what happens to a job after a failed attempt.
//!
//! The policy is a pure function of the job's counters and the current time,
//! so stores only perform the write it decides on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults;

/// Exponential backoff configuration.
///
/// The delay before attempt `n + 1` after the `n`-th failure is
/// `base_delay * 2^(n - 1)`, optionally capped by `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(defaults::RETRY_BASE_DELAY_SECS),
            max_delay: None,
        }
    }
}

/// Decision taken for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `pending`, claimable from `process_after` on.
    Retry {
        retry_count: i32,
        delay: Duration,
        process_after: DateTime<Utc>,
    },
    /// Terminal `failed`.
    Exhausted { retry_count: i32 },
}

impl FailureOutcome {
    /// Retry count written by this outcome.
    pub fn retry_count(&self) -> i32 {
        match self {
            FailureOutcome::Retry { retry_count, .. } | FailureOutcome::Exhausted { retry_count } => {
                *retry_count
            }
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, FailureOutcome::Retry { .. })
    }
}

impl RetryPolicy {
    /// Create a policy with the given base delay and no cap.
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: None,
        }
    }

    /// Cap every delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay scheduled after the `retry_count`-th failure (one-based).
    ///
    /// Saturates instead of overflowing for large counts.
    pub fn backoff_delay(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.saturating_sub(1).clamp(0, 31) as u32;
        let delay = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Decide the next state of a job that just failed an attempt.
    ///
    /// `retry_count` and `max_retries` are the values read from the row before
    /// this failure. A non-retryable failure is terminal regardless of budget.
    pub fn decide(
        &self,
        retry_count: i32,
        max_retries: i32,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        let new_retry_count = retry_count.saturating_add(1);

        if !retryable || new_retry_count > max_retries {
            return FailureOutcome::Exhausted {
                retry_count: new_retry_count,
            };
        }

        let delay = self.backoff_delay(new_retry_count);
        let process_after = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        FailureOutcome::Retry {
            retry_count: new_retry_count,
            delay,
            process_after,
        }
    }
}
