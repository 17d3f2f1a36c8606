use batchgate_common::ProcessorConfig;
use rand::Rng;
use std::time::Duration;

/// Retry/backoff policy for rows whose unit of work failed.
///
/// Delays grow geometrically from `backoff_initial` and are capped at `backoff_max`,
/// so the defaults produce 4s, 8s, 16s, 16s, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per row, the first one included
    pub max_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_multiplier: u32,
    pub backoff_max: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ProcessorConfig::default())
    }
}

impl From<&ProcessorConfig> for RetryPolicy {
    fn from(cfg: &ProcessorConfig) -> Self {
        Self {
            max_attempts: cfg.max_retry_attempts,
            backoff_initial: cfg.backoff.initial,
            backoff_multiplier: cfg.backoff.multiplier,
            backoff_max: cfg.backoff.max,
            jitter: cfg.backoff.jitter,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt follows a failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay after failed `attempt` (1-based), before jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = self.backoff_multiplier.saturating_pow(exp);
        self.backoff_initial
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.backoff_max)
    }

    /// Full jitter: uniform in `[0, backoff_for(attempt)]`.
    pub fn jittered_backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped_ms = self.backoff_for(attempt).as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rng.gen_range(0..=capped_ms))
    }

    /// The delay the processor actually sleeps for.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.jitter {
            self.jittered_backoff(attempt, &mut rand::thread_rng())
        } else {
            self.backoff_for(attempt)
        }
    }
}
