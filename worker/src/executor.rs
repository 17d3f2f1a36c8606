use crate::limits::ConcurrencyLimiter;
use crate::metrics::Metrics;
use crate::{BatchError, Result};
use batchgate_common::LimiterStatus;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs units of work under a permit from the shared limiter.
///
/// This is the only sanctioned way to use the limiter: the permit is scoped to the
/// call and is released however the work ends, including panics and the caller
/// dropping the returned future.
#[derive(Clone, Debug)]
pub struct BoundedExecutor {
    limiter: ConcurrencyLimiter,
    metrics: Metrics,
}

impl BoundedExecutor {
    pub fn new(limiter: ConcurrencyLimiter, metrics: Metrics) -> Self {
        Self { limiter, metrics }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn status(&self) -> LimiterStatus {
        self.limiter.status()
    }

    /// Acquire a permit, run `work`, release, and hand back its output unchanged.
    pub async fn run<F, Fut, T>(&self, correlation_id: Option<&str>, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.limiter.acquire(correlation_id).await;
        if permit.waited() {
            self.metrics.inc_permit_wait();
        }
        let output = work().await;
        drop(permit);
        output
    }

    /// Like [`run`](Self::run), but the caller stops waiting after `timeout`.
    ///
    /// The work runs as its own task. On timeout that task is left to finish in the
    /// background and returns its permit when it settles; only the caller gives up.
    pub async fn run_with_timeout<Fut, T>(
        &self,
        correlation_id: Option<String>,
        timeout: Duration,
        work: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let executor = self.clone();
        let cid = correlation_id.clone();
        let handle = tokio::spawn(async move { executor.run(cid.as_deref(), move || work).await });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(join_err)) => Err(BatchError::Internal(format!("bounded task failed: {join_err}")).into()),
            Err(_) => {
                self.metrics.inc_timeout();
                warn!(
                    event = "bounded_timeout",
                    correlation_id = correlation_id.as_deref().unwrap_or("-"),
                    timeout_ms = timeout.as_millis() as u64,
                    "caller stopped waiting; work continues in background"
                );
                Err(BatchError::Timeout(format!("no result within {}ms", timeout.as_millis())).into())
            }
        }
    }
}
