//! Centralized default constants for geoworker.
//!
//! Every crate and the worker binary reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// POLLING
// =============================================================================

/// Seconds between the starts of two poll cycles.
pub const POLL_INTERVAL_SECS: u64 = 30;

/// Maximum candidates fetched per poll cycle.
pub const FETCH_LIMIT: i64 = 100;

// =============================================================================
// EXECUTION
// =============================================================================

/// Handler slots per poller process.
pub const MAX_CONCURRENT: usize = 3;

/// Deadline for a single handler invocation, in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 3600;

/// A `processing` row untouched for this many timeouts is considered orphaned.
pub const STALE_AFTER_TIMEOUTS: u32 = 2;

// =============================================================================
// RETRY
// =============================================================================

/// Retry ceiling for newly queued jobs.
pub const JOB_MAX_RETRIES: i32 = 3;

/// First backoff delay in seconds (30s, 60s, 120s, ...).
pub const RETRY_BASE_DELAY_SECS: u64 = 30;

// =============================================================================
// EVENTS
// =============================================================================

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;
