//! Error types for geoworker.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Result type alias using geoworker's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for geoworker operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// A status write was attempted against a row in the wrong status.
    #[error("Invalid transition for job {job_id}: expected {expected}, found {actual}")]
    InvalidTransition {
        job_id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The job is `processing` under a newer claim than the caller's.
    #[error("Claim lost for job {0}: it was recovered and claimed again")]
    ClaimLost(Uuid),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
