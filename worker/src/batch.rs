use crate::executor::BoundedExecutor;
use crate::limits::ConcurrencyLimiter;
use crate::metrics::Metrics;
use crate::retry::RetryPolicy;
use crate::Result;
use batchgate_common::{
    AttemptOutcome, BatchResult, LimiterStatus, ProcessorConfig, Row, RowAttempt, RowResult, RowState,
};
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Receives each row's terminal result as soon as the row finishes.
pub trait RowReporter<T>: Send + Sync {
    fn row_finished(&self, batch_id: &str, result: &RowResult<T>);

    /// Called on every state change of a row, starting with `Pending` (attempt 0).
    fn row_state(&self, _batch_id: &str, _row_id: &str, _attempt: u32, _state: RowState) {}
}

/// Reporter that ignores every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl<T> RowReporter<T> for NoopReporter {
    fn row_finished(&self, _batch_id: &str, _result: &RowResult<T>) {}
}

/// Drives every row of a batch to a terminal outcome.
///
/// All rows are submitted at once; the shared limiter decides how many actually run.
/// A failing row is retried per the [`RetryPolicy`] without holding a permit during
/// its backoff, and never holds up or aborts the other rows.
#[derive(Clone, Debug)]
pub struct BatchRowProcessor {
    executor: BoundedExecutor,
    policy: RetryPolicy,
}

impl BatchRowProcessor {
    pub fn new(executor: BoundedExecutor, policy: RetryPolicy) -> Self {
        Self { executor, policy }
    }

    /// Build a processor on an existing shared limiter after validating `config`.
    ///
    /// `config.max_capacity` is not applied here; it sizes the limiter at startup.
    pub fn from_config(limiter: ConcurrencyLimiter, config: &ProcessorConfig, metrics: Metrics) -> Result<Self> {
        config.validate().map_err(crate::BatchError::from)?;
        Ok(Self::new(BoundedExecutor::new(limiter, metrics), RetryPolicy::from(config)))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    pub fn status(&self) -> LimiterStatus {
        self.executor.status()
    }

    pub async fn process_batch<P, T, E, F, Fut>(
        &self,
        batch_id: &str,
        rows: Vec<Row<P>>,
        unit_of_work: F,
    ) -> BatchResult<T>
    where
        F: Fn(&Row<P>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        self.process_batch_reported(batch_id, rows, unit_of_work, &NoopReporter)
            .await
    }

    /// Process a batch, notifying `reporter` as each row reaches a terminal state.
    pub async fn process_batch_reported<P, T, E, F, Fut, R>(
        &self,
        batch_id: &str,
        rows: Vec<Row<P>>,
        unit_of_work: F,
        reporter: &R,
    ) -> BatchResult<T>
    where
        F: Fn(&Row<P>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
        R: RowReporter<T> + ?Sized,
    {
        let started = Instant::now();
        let metrics = self.executor.metrics();
        metrics.add_rows_submitted(rows.len() as u64);
        info!(
            event = "batch_start",
            batch_id,
            rows = rows.len(),
            max_attempts = self.policy.max_attempts,
            "processing batch"
        );

        let row_results = join_all(
            rows.iter()
                .map(|row| self.drive_row(batch_id, row, &unit_of_work, reporter)),
        )
        .await;

        let result = BatchResult::from_rows(batch_id, row_results);
        info!(
            event = "batch_complete",
            batch_id,
            processed = result.processed,
            succeeded = result.succeeded,
            failed = result.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        result
    }

    async fn drive_row<P, T, E, F, Fut, R>(
        &self,
        batch_id: &str,
        row: &Row<P>,
        unit_of_work: &F,
        reporter: &R,
    ) -> RowResult<T>
    where
        F: Fn(&Row<P>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
        R: RowReporter<T> + ?Sized,
    {
        let metrics = self.executor.metrics();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut history = Vec::new();
        let mut attempt = 0;
        transition::<T, R>(reporter, batch_id, &row.id, attempt, RowState::Pending);

        let result = loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = self
                .executor
                .run(Some(batch_id), || {
                    transition::<T, R>(reporter, batch_id, &row.id, attempt, RowState::Running);
                    unit_of_work(row)
                })
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            metrics.inc_attempt();

            match outcome {
                Ok(value) => {
                    history.push(RowAttempt {
                        attempt,
                        outcome: AttemptOutcome::Success,
                        error: None,
                        elapsed_ms,
                    });
                    metrics.inc_row_success();
                    transition::<T, R>(reporter, batch_id, &row.id, attempt, RowState::Success);
                    break RowResult {
                        row_id: row.id.clone(),
                        state: RowState::Success,
                        attempts: attempt,
                        value: Some(value),
                        error: None,
                        history,
                    };
                }
                Err(err) => {
                    let detail = err.to_string();
                    history.push(RowAttempt {
                        attempt,
                        outcome: AttemptOutcome::Failure,
                        error: Some(detail.clone()),
                        elapsed_ms,
                    });

                    if attempt < max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        metrics.inc_retry();
                        warn!(
                            event = "row_retry",
                            batch_id,
                            row_id = %row.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %detail,
                            "row attempt failed, retrying after backoff"
                        );
                        transition::<T, R>(reporter, batch_id, &row.id, attempt, RowState::RetryPending);
                        sleep(delay).await;
                        continue;
                    }

                    metrics.inc_row_failure();
                    warn!(
                        event = "row_failed",
                        batch_id,
                        row_id = %row.id,
                        attempts = attempt,
                        error = %detail,
                        "row exhausted its attempts"
                    );
                    transition::<T, R>(reporter, batch_id, &row.id, attempt, RowState::Failed);
                    break RowResult {
                        row_id: row.id.clone(),
                        state: RowState::Failed,
                        attempts: attempt,
                        value: None,
                        error: Some(detail),
                        history,
                    };
                }
            }
        };

        reporter.row_finished(batch_id, &result);
        result
    }
}

fn transition<T, R>(reporter: &R, batch_id: &str, row_id: &str, attempt: u32, state: RowState)
where
    R: RowReporter<T> + ?Sized,
{
    debug!(event = "row_state", batch_id, row_id, attempt, state = ?state);
    reporter.row_state(batch_id, row_id, attempt, state);
}
