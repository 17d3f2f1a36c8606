use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// In-process counters for batch processing.
///
/// Clones share the same counters, so one instance can be handed to the executor
/// and every processor built on it.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rows_submitted_total: AtomicU64,
    rows_succeeded_total: AtomicU64,
    rows_failed_total: AtomicU64,

    attempts_total: AtomicU64,
    retries_total: AtomicU64,
    permit_waits_total: AtomicU64,
    timeouts_total: AtomicU64,
}

impl Metrics {
    pub fn add_rows_submitted(&self, rows: u64) {
        self.inner.rows_submitted_total.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn inc_row_success(&self) {
        self.inner.rows_succeeded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_row_failure(&self) {
        self.inner.rows_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_attempt(&self) {
        self.inner.attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retry(&self) {
        self.inner.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_permit_wait(&self) {
        self.inner.permit_waits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_timeout(&self) {
        self.inner.timeouts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_submitted_total: self.inner.rows_submitted_total.load(Ordering::Relaxed),
            rows_succeeded_total: self.inner.rows_succeeded_total.load(Ordering::Relaxed),
            rows_failed_total: self.inner.rows_failed_total.load(Ordering::Relaxed),
            attempts_total: self.inner.attempts_total.load(Ordering::Relaxed),
            retries_total: self.inner.retries_total.load(Ordering::Relaxed),
            permit_waits_total: self.inner.permit_waits_total.load(Ordering::Relaxed),
            timeouts_total: self.inner.timeouts_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rows_submitted_total: u64,
    pub rows_succeeded_total: u64,
    pub rows_failed_total: u64,
    pub attempts_total: u64,
    pub retries_total: u64,
    pub permit_waits_total: u64,
    pub timeouts_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::default();
        let other = metrics.clone();

        metrics.add_rows_submitted(5);
        other.inc_attempt();
        other.inc_attempt();
        metrics.inc_retry();
        other.inc_row_success();

        let snap = metrics.snapshot();
        assert_eq!(snap.rows_submitted_total, 5);
        assert_eq!(snap.attempts_total, 2);
        assert_eq!(snap.retries_total, 1);
        assert_eq!(snap.rows_succeeded_total, 1);
        assert_eq!(snap.rows_failed_total, 0);
        assert_eq!(snap, other.snapshot());
    }
}
