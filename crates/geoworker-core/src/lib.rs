//! # geoworker-core
//!
//! Core types, traits, and policies for the geoworker job queue.
//!
//! This crate provides the data model shared by the stores and the worker:
//! - [`Job`], [`JobStatus`] and the transition rules between statuses
//! - The [`JobStore`] trait implemented by the PostgreSQL and memory stores
//! - The [`RetryPolicy`] that turns a failed attempt into a reschedule or a
//!   terminal failure
//! - The [`Clock`] abstraction used for every read of "now" and every sleep
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Store unreachable, job row left stale, handler panic |
//! | WARN  | Job failure, timeout, retry scheduled, stale claim recovered |
//! | INFO  | Worker lifecycle, job started/completed |
//! | DEBUG | Claim races, empty cycles, sleep decisions |

pub mod clock;
pub mod defaults;
pub mod error;
pub mod models;
pub mod retry;
pub mod traits;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use models::*;
pub use retry::{FailureOutcome, RetryPolicy};
pub use traits::*;
