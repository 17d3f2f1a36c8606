use thiserror::Error;

use crate::config::ConfigError;

/// Common error types that can occur across the batchgate system
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    // Caller errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    // Limiter bookkeeping defects
    #[error("Limiter misuse: {0}")]
    LimiterMisuse(#[from] LimiterError),

    // Row-level upstream errors
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    // System errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Whether a row attempt that failed with this error may be tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BatchError::Timeout(_) | BatchError::Upstream(_))
    }
}

/// Permit bookkeeping violations. These are programming defects, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("release would raise available permits above the maximum of {max}")]
    OverRelease { max: usize },
}

/// Common result type for the batchgate system
pub type Result<T> = std::result::Result<T, BatchError>;

/// Worker-specific error wrapper
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Worker error: {0}")]
    Worker(#[from] BatchError),
}

impl WorkerError {
    pub fn inner(&self) -> &BatchError {
        match self {
            WorkerError::Worker(err) => err,
        }
    }
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;
