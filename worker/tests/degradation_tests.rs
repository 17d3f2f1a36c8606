use batchgate_worker::{
    BatchError, BoundedExecutor, ConcurrencyLimiter, LimiterError, LimiterStatus, Metrics, ProcessorConfig,
    RetryPolicy, WorkerError,
};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn degradation_limiter_queues_excess_callers() {
    let limiter = ConcurrencyLimiter::new(2);
    let held = vec![limiter.acquire(None).await, limiter.acquire(None).await];

    let l = limiter.clone();
    let t0 = Instant::now();
    let queued = tokio::spawn(async move {
        let permit = l.acquire(Some("overflow")).await;
        (permit.waited(), Instant::now())
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(limiter.status(), LimiterStatus { available: 0, waiting: 1, max: 2 });
    drop(held);

    let (waited, granted_at) = queued.await.unwrap();
    assert!(waited);
    assert!(granted_at - t0 >= Duration::from_millis(150));
    assert_eq!(limiter.status().available, 2);
}

#[tokio::test(start_paused = true)]
async fn degradation_timeout_does_not_leak_permits() {
    let exec = BoundedExecutor::new(ConcurrencyLimiter::new(2), Metrics::default());

    for i in 0..4 {
        let res = exec
            .run_with_timeout(Some(format!("stuck-{i}")), Duration::from_millis(100), async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .await;
        assert!(matches!(res, Err(WorkerError::Worker(BatchError::Timeout(_)))));
    }
    assert_eq!(exec.metrics().snapshot().timeouts_total, 4);

    tokio::time::sleep(Duration::from_secs(120)).await;
    while exec.limiter().in_flight() > 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(exec.status(), LimiterStatus { available: 2, waiting: 0, max: 2 });
}

#[tokio::test]
async fn degradation_over_release_is_loud() {
    let limiter = ConcurrencyLimiter::new(3);
    let permit = limiter.acquire(None).await;
    drop(permit);

    assert_eq!(limiter.release(), Err(LimiterError::OverRelease { max: 3 }));
    assert_eq!(limiter.status().available, 3);
}

#[tokio::test]
async fn degradation_unmatched_release_cannot_admit_a_waiter() {
    let limiter = ConcurrencyLimiter::new(1);
    let held = limiter.acquire(None).await;

    let l = limiter.clone();
    let queued = tokio::spawn(async move {
        let _p = l.acquire(Some("queued")).await;
    });
    while limiter.status().waiting < 1 {
        tokio::task::yield_now().await;
    }

    assert_eq!(limiter.release(), Err(LimiterError::OverRelease { max: 1 }));
    assert_eq!(limiter.in_flight(), 1);
    assert_eq!(limiter.status(), LimiterStatus { available: 0, waiting: 1, max: 1 });

    drop(held);
    queued.await.unwrap();
    assert_eq!(limiter.status().available, 1);
}

#[test]
fn degradation_retry_policy_caps_backoff() {
    let p = RetryPolicy::default();
    assert_eq!(p.max_attempts, 3);
    assert_eq!(p.backoff_initial, Duration::from_secs(4));
    assert_eq!(p.backoff_max, Duration::from_secs(16));
    for attempt in 1..=10 {
        assert!(p.backoff_for(attempt) <= p.backoff_max);
    }
}

#[test]
fn degradation_policy_follows_config() {
    let mut cfg = ProcessorConfig::default();
    cfg.max_retry_attempts = 5;
    cfg.backoff.initial = Duration::from_millis(100);
    cfg.backoff.multiplier = 3;
    cfg.backoff.max = Duration::from_millis(1000);

    let p = RetryPolicy::from(&cfg);
    assert_eq!(p.max_attempts, 5);
    assert_eq!(p.backoff_for(1), Duration::from_millis(100));
    assert_eq!(p.backoff_for(2), Duration::from_millis(300));
    assert_eq!(p.backoff_for(3), Duration::from_millis(900));
    assert_eq!(p.backoff_for(4), Duration::from_millis(1000));
}
