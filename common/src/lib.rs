//! Common types and utilities for the batchgate row processor
//!
//! This crate provides the configuration struct, error taxonomy and the row/batch
//! data structures shared by the worker and anything that reports on its results.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types and errors
pub use config::{
    BackoffConfig, ConfigError, ProcessorConfig, DEFAULT_MAX_CAPACITY, DEFAULT_MAX_RETRY_ATTEMPTS, MAX_RETRY_ATTEMPTS_LIMIT,
};

pub use error::{BatchError, LimiterError, Result, WorkerError, WorkerResult};

pub use types::{
    // Row lifecycle
    Row, RowId, RowState, RowAttempt, AttemptOutcome, RowResult,

    // Aggregates and status
    BatchResult, BatchSummary, LimiterStatus,
};

/// Version information for the common crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Generate a new UUID v4 string
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
