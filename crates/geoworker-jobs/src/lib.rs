//! # geoworker-jobs
//!
//! Poll loop and handler dispatch for the geoworker job queue.
//!
//! This crate provides:
//! - The [`JobHandler`] contract and a [`HandlerRegistry`] keyed by job type
//! - Dispatch with panic containment and an unknown-type policy
//! - Per-job deadlines ([`TimeoutSupervisor`])
//! - The [`JobWorker`] poll loop: fetch, claim, execute under a concurrency
//!   limit, record the outcome through the retry policy, sleep
//! - [`CommandHandler`], which runs an external program per job
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use geoworker_db::Database;
//! use geoworker_jobs::{CommandHandler, CommandSpec, WorkerBuilder, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//!
//! let worker = WorkerBuilder::new(db.job_store())
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(CommandHandler::new("refresh_models", CommandSpec::new("./refresh.sh")))
//!     .build()?;
//!
//! let handle = worker.start();
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod command;
pub mod dispatcher;
pub mod handler;
pub mod registry;
pub mod supervisor;
pub mod worker;

// Re-export core types
pub use geoworker_core::*;

pub use command::{CommandHandler, CommandSpec};
pub use dispatcher::{unknown_job_type_message, Dispatcher, UnknownJobTypePolicy};
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use registry::HandlerRegistry;
pub use supervisor::{timeout_message, TimeoutSupervisor};
pub use worker::{
    parse_job_types, CycleReport, JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent,
    WorkerHandle,
};
