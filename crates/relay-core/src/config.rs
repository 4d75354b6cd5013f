//! Engine configuration with startup validation.
//!
//! One explicit value object constructed once and passed into each component
//! at construction time. Invalid combinations are rejected by `validate`
//! before the first sweep runs, never at send time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Configuration for the delivery engine and fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between due-event sweeps in the runner loop.
    pub sweep_interval_secs: u64,

    /// Consecutive failures that trip an endpoint to Unhealthy; the window
    /// size of the health breaker. `None` disables the breaker entirely.
    pub unhealthy_after_failures: Option<u32>,

    /// Minutes an Unhealthy endpoint must sit idle before the out-of-band
    /// sweep promotes it to Probation.
    pub probation_after_minutes: i64,

    /// Minutes a cached subscription list stays valid.
    pub cache_ttl_minutes: i64,

    /// Maximum delivery attempts before an event is marked Failed. At least 1.
    pub max_attempts: u32,

    /// Ordered backoff waits in minutes, indexed by attempt number. The last
    /// entry repeats indefinitely. Non-empty, all entries >= 0.
    pub backoff_minutes: Vec<i64>,

    /// Minutes after which a Sending lease is treated as leaked and the
    /// event becomes eligible again. At least 1.
    pub lease_timeout_minutes: i64,

    /// In-band retries of one attempt on HTTP 429 before giving up.
    pub max_rate_limit_retries: u32,

    /// Initial sleep after a 429, doubling on every further 429. Positive.
    pub rate_limit_initial_backoff_ms: u64,

    /// Overall HTTP request timeout. Positive.
    pub http_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            unhealthy_after_failures: Some(5),
            probation_after_minutes: 60,
            cache_ttl_minutes: 5,
            max_attempts: 5,
            backoff_minutes: vec![1, 5, 15, 60, 240],
            lease_timeout_minutes: 10,
            max_rate_limit_retries: 3,
            rate_limit_initial_backoff_ms: 1000,
            http_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration, failing fast on unusable combinations.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(CoreError::invalid_config("sweep_interval_secs must be positive"));
        }
        if self.max_attempts < 1 {
            return Err(CoreError::invalid_config("max_attempts must be at least 1"));
        }
        if self.backoff_minutes.is_empty() {
            return Err(CoreError::invalid_config("backoff_minutes must not be empty"));
        }
        if self.backoff_minutes.iter().any(|&minutes| minutes < 0) {
            return Err(CoreError::invalid_config("backoff_minutes entries must be >= 0"));
        }
        if self.lease_timeout_minutes < 1 {
            return Err(CoreError::invalid_config("lease_timeout_minutes must be at least 1"));
        }
        if self.rate_limit_initial_backoff_ms == 0 {
            return Err(CoreError::invalid_config(
                "rate_limit_initial_backoff_ms must be positive",
            ));
        }
        if self.http_timeout_ms == 0 {
            return Err(CoreError::invalid_config("http_timeout_ms must be positive"));
        }
        if self.probation_after_minutes < 0 {
            return Err(CoreError::invalid_config("probation_after_minutes must be >= 0"));
        }
        if self.cache_ttl_minutes < 0 {
            return Err(CoreError::invalid_config("cache_ttl_minutes must be >= 0"));
        }
        Ok(())
    }

    /// Validates and returns the configuration, for construction pipelines.
    ///
    /// # Errors
    ///
    /// Same as [`validate`](Self::validate).
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Backoff wait before the next attempt, given the number of the attempt
    /// that just failed (1-based). Saturates at the last table entry.
    pub fn backoff_for_attempt(&self, attempt_number: u32) -> chrono::Duration {
        let index = (attempt_number.saturating_sub(1) as usize).min(self.backoff_minutes.len() - 1);
        chrono::Duration::minutes(self.backoff_minutes[index])
    }

    /// Overall HTTP request timeout as a std duration.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Initial rate-limit backoff as a std duration.
    pub fn rate_limit_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_initial_backoff_ms)
    }

    /// Lease duration applied when an event moves to Sending.
    pub fn lease_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lease_timeout_minutes)
    }

    /// Subscription-cache time-to-live.
    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cache_ttl_minutes)
    }
}
