use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default ceiling on concurrently executing units of work across the process.
pub const DEFAULT_MAX_CAPACITY: usize = 250;
/// Default number of attempts per row, including the first one.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
/// Largest accepted `max_retry_attempts`.
pub const MAX_RETRY_ATTEMPTS_LIMIT: u32 = 100;

/// Processor configuration, constructed once at startup and passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Maximum number of permits the shared limiter hands out
    pub max_capacity: usize,
    /// Total attempts per row before it is marked failed
    pub max_retry_attempts: u32,
    /// Delay policy between attempts of the same row
    pub backoff: BackoffConfig,
}

/// Exponential backoff with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt
    #[serde(with = "duration_ms", rename = "initial_ms")]
    pub initial: Duration,
    /// Growth factor applied per further failure
    pub multiplier: u32,
    /// Upper bound for any single delay
    #[serde(with = "duration_ms", rename = "max_ms")]
    pub max: Duration,
    /// Draw each delay uniformly from `[0, computed]` instead of using it as-is
    pub jitter: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(4),
            multiplier: 2,
            max: Duration::from_secs(16),
            jitter: false,
        }
    }
}

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_capacity must be greater than zero")]
    ZeroCapacity,

    #[error("max_retry_attempts must be at least 1")]
    ZeroAttempts,

    #[error("max_retry_attempts must not exceed {max}")]
    TooManyAttempts { max: u32 },

    #[error("backoff multiplier must be at least 1")]
    ZeroMultiplier,

    #[error("backoff initial delay {initial_ms}ms exceeds maximum {max_ms}ms")]
    InitialAboveMax { initial_ms: u128, max_ms: u128 },
}

impl ProcessorConfig {
    /// Defaults overlaid with `BATCHGATE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_capacity: env_or("BATCHGATE_MAX_CAPACITY", defaults.max_capacity),
            max_retry_attempts: env_or("BATCHGATE_MAX_RETRY_ATTEMPTS", defaults.max_retry_attempts),
            backoff: BackoffConfig {
                initial: env_ms_or("BATCHGATE_BACKOFF_INITIAL_MS", defaults.backoff.initial),
                multiplier: env_or("BATCHGATE_BACKOFF_MULTIPLIER", defaults.backoff.multiplier),
                max: env_ms_or("BATCHGATE_BACKOFF_MAX_MS", defaults.backoff.max),
                jitter: env_flag_or("BATCHGATE_BACKOFF_JITTER", defaults.backoff.jitter),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.max_retry_attempts > MAX_RETRY_ATTEMPTS_LIMIT {
            return Err(ConfigError::TooManyAttempts { max: MAX_RETRY_ATTEMPTS_LIMIT });
        }
        if self.backoff.multiplier == 0 {
            return Err(ConfigError::ZeroMultiplier);
        }
        if self.backoff.initial > self.backoff.max {
            return Err(ConfigError::InitialAboveMax {
                initial_ms: self.backoff.initial.as_millis(),
                max_ms: self.backoff.max.as_millis(),
            });
        }
        Ok(())
    }
}

/// Parse a typed environment value, falling back to `default` when unset or malformed.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_ms_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_flag_or(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
