pub mod error;
pub mod batch;
pub mod executor;
pub mod limits;
pub mod logging;
pub mod metrics;
pub mod retry;

#[cfg(feature = "mock")]
pub mod mock;

// Re-export common types and worker-specific types
pub use batchgate_common::*;
pub use error::Result;
pub use batch::{BatchRowProcessor, NoopReporter, RowReporter};
pub use executor::BoundedExecutor;
pub use limits::{ConcurrencyLimiter, Permit};
pub use metrics::{Metrics, MetricsSnapshot};
pub use retry::RetryPolicy;

/// Build the shared limiter and a processor on it from one validated config.
///
/// Call once at startup; clone the processor (or build more with
/// [`BatchRowProcessor::from_config`] on `processor.executor().limiter().clone()`)
/// so every batch in the process shares the same permit pool.
pub fn processor_from_config(config: &ProcessorConfig) -> Result<BatchRowProcessor> {
    config.validate().map_err(BatchError::from)?;
    let limiter = ConcurrencyLimiter::new(config.max_capacity);
    BatchRowProcessor::from_config(limiter, config, Metrics::default())
}
