// Re-export common error types with worker-specific extensions
pub use batchgate_common::{BatchError, LimiterError, WorkerError, WorkerResult};

// Worker-specific result type alias for convenience
pub type Result<T> = WorkerResult<T>;
