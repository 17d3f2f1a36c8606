use batchgate_common::{LimiterError, LimiterStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

pub use batchgate_common::DEFAULT_MAX_CAPACITY;

/// Process-wide concurrency limiter for upstream generation calls.
///
/// Permits are granted in arrival order; a released permit goes to the
/// longest-waiting caller before it is visible to `try_acquire`. Cloning is cheap
/// and every clone shares the same pool, so create one at startup and hand clones
/// to each batch processor.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    sem: Arc<Semaphore>,
    max: usize,
    // callers suspended in `acquire`
    waiting: Arc<AtomicUsize>,
    // permits taken out of scope-based release with `Permit::forget`
    detached: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    pub fn new(max_capacity: usize) -> Self {
        assert!(max_capacity > 0, "max_capacity must be > 0");
        Self {
            sem: Arc::new(Semaphore::new(max_capacity)),
            max: max_capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
            detached: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn max_capacity(&self) -> usize {
        self.max
    }

    /// Take a permit, queueing behind earlier callers when none is free.
    ///
    /// The returned [`Permit`] gives the slot back when dropped. Dropping this future
    /// while it is queued withdraws the request without losing a permit.
    pub async fn acquire(&self, correlation_id: Option<&str>) -> Permit {
        if let Some(permit) = self.try_acquire() {
            return permit;
        }

        let _queued = WaitingGuard::enter(&self.waiting);
        debug!(
            event = "permit_queued",
            correlation_id = correlation_id.unwrap_or("-"),
            waiting = self.waiting.load(Ordering::Relaxed),
            "no permit available, caller queued"
        );
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .expect("limiter semaphore is never closed");
        Permit::new(permit, Arc::clone(&self.detached), true)
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        self.sem
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| Permit::new(permit, Arc::clone(&self.detached), false))
    }

    /// Give back a permit that was detached with [`Permit::forget`].
    ///
    /// A release with no detached permit outstanding, or one that would push the pool
    /// above its maximum, is a bookkeeping defect. It is reported as
    /// [`LimiterError::OverRelease`] and the pool is left untouched.
    pub fn release(&self) -> Result<(), LimiterError> {
        let claimed = self
            .detached
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if !claimed || self.sem.available_permits() >= self.max {
            if claimed {
                self.detached.fetch_add(1, Ordering::AcqRel);
            }
            error!(event = "limiter_misuse", max = self.max, "unmatched permit release");
            return Err(LimiterError::OverRelease { max: self.max });
        }
        self.sem.add_permits(1);
        Ok(())
    }

    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            available: self.sem.available_permits(),
            waiting: self.waiting.load(Ordering::Acquire),
            max: self.max,
        }
    }

    /// Permits currently held, detached ones included
    pub fn in_flight(&self) -> usize {
        self.max.saturating_sub(self.sem.available_permits())
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Right to run one unit of work. Released on drop.
#[must_use = "dropping a permit releases it immediately"]
#[derive(Debug)]
pub struct Permit {
    permit: OwnedSemaphorePermit,
    detached: Arc<AtomicUsize>,
    waited: bool,
}

impl Permit {
    fn new(permit: OwnedSemaphorePermit, detached: Arc<AtomicUsize>, waited: bool) -> Self {
        Self {
            permit,
            detached,
            waited,
        }
    }

    /// Whether the holder had to queue for this permit
    pub fn waited(&self) -> bool {
        self.waited
    }

    /// Detach the permit from scope-based release. The slot stays taken until
    /// [`ConcurrencyLimiter::release`] is called.
    pub fn forget(self) {
        self.detached.fetch_add(1, Ordering::AcqRel);
        self.permit.forget();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn wait_for_waiters(limiter: &ConcurrencyLimiter, n: usize) {
        while limiter.status().waiting < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn status_reports_available_and_waiting() {
        let limiter = ConcurrencyLimiter::new(3);
        let _p1 = limiter.acquire(None).await;
        let _p2 = limiter.acquire(None).await;
        assert_eq!(limiter.status(), LimiterStatus { available: 1, waiting: 0, max: 3 });

        let p3 = limiter.acquire(None).await;
        let l = limiter.clone();
        let fourth = tokio::spawn(async move {
            let _p = l.acquire(Some("batch-4")).await;
        });
        wait_for_waiters(&limiter, 1).await;
        assert_eq!(limiter.status(), LimiterStatus { available: 0, waiting: 1, max: 3 });

        drop(p3);
        fourth.await.unwrap();
        assert_eq!(limiter.status(), LimiterStatus { available: 1, waiting: 0, max: 3 });
    }

    #[tokio::test]
    async fn extra_caller_waits_until_a_release() {
        let limiter = ConcurrencyLimiter::new(2);
        let p1 = limiter.acquire(None).await;
        let _p2 = limiter.acquire(None).await;

        let l = limiter.clone();
        let third = tokio::spawn(async move {
            let permit = l.acquire(None).await;
            assert!(permit.waited());
        });
        wait_for_waiters(&limiter, 1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!third.is_finished());

        drop(p1);
        third.await.unwrap();
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire(None).await;
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let l = limiter.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = l.acquire(Some(&format!("caller-{i}"))).await;
                order.lock().unwrap().push(i);
                tokio::task::yield_now().await;
            }));
            wait_for_waiters(&limiter, i + 1).await;
        }

        drop(held);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(limiter.status().available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20u64)
            .map(|i| {
                let l = limiter.clone();
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let _permit = l.acquire(None).await;
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(l.in_flight() <= 3);
                    tokio::time::sleep(Duration::from_millis(5 + i % 4)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.status(), LimiterStatus { available: 3, waiting: 0, max: 3 });
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_permit() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire(None).await;

        let l = limiter.clone();
        let cancelled = tokio::spawn(async move {
            let _p = l.acquire(Some("cancelled")).await;
        });
        wait_for_waiters(&limiter, 1).await;

        let l = limiter.clone();
        let survivor = tokio::spawn(async move {
            let _p = l.acquire(Some("survivor")).await;
        });
        wait_for_waiters(&limiter, 2).await;

        cancelled.abort();
        assert!(cancelled.await.unwrap_err().is_cancelled());
        assert_eq!(limiter.status().waiting, 1);

        drop(held);
        survivor.await.unwrap();
        assert_eq!(limiter.status(), LimiterStatus { available: 1, waiting: 0, max: 1 });
    }

    #[tokio::test]
    async fn try_acquire_does_not_overtake_waiters() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.try_acquire().expect("free permit");
        assert!(limiter.try_acquire().is_none());

        let (tx, rx) = oneshot::channel::<()>();
        let l = limiter.clone();
        let waiter = tokio::spawn(async move {
            let _p = l.acquire(None).await;
            let _ = rx.await;
        });
        wait_for_waiters(&limiter, 1).await;

        drop(held);
        // The permit went straight to the queued caller.
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_flight(), 1);

        let _ = tx.send(());
        waiter.await.unwrap();
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn unmatched_release_is_reported() {
        let limiter = ConcurrencyLimiter::new(1);
        assert_eq!(limiter.release(), Err(LimiterError::OverRelease { max: 1 }));
        assert_eq!(limiter.status().available, 1);

        limiter.acquire(None).await.forget();
        assert_eq!(limiter.status().available, 0);
        assert_eq!(limiter.release(), Ok(()));
        assert_eq!(limiter.status().available, 1);
        assert_eq!(limiter.release(), Err(LimiterError::OverRelease { max: 1 }));
    }

    #[tokio::test]
    async fn unmatched_release_with_queued_waiter_is_rejected() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire(None).await;

        let l = limiter.clone();
        let queued = tokio::spawn(async move {
            let _p = l.acquire(Some("queued")).await;
        });
        wait_for_waiters(&limiter, 1).await;

        // No permit was detached, so nothing may be handed to the waiter.
        assert_eq!(limiter.release(), Err(LimiterError::OverRelease { max: 1 }));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!queued.is_finished());
        assert_eq!(limiter.status(), LimiterStatus { available: 0, waiting: 1, max: 1 });

        drop(held);
        queued.await.unwrap();
        assert_eq!(limiter.status().available, 1);
    }

    #[tokio::test]
    async fn released_detached_permit_goes_to_queued_waiter() {
        let limiter = ConcurrencyLimiter::new(1);
        limiter.acquire(None).await.forget();

        let l = limiter.clone();
        let queued = tokio::spawn(async move { l.acquire(Some("queued")).await.waited() });
        wait_for_waiters(&limiter, 1).await;

        assert_eq!(limiter.release(), Ok(()));
        assert!(queued.await.unwrap());
        assert_eq!(limiter.status(), LimiterStatus { available: 1, waiting: 0, max: 1 });
    }
}
