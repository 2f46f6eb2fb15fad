//! Retry scheduling for subscription channels.
//!
//! Delays follow `min(base * 2^(attempt-1), cap) + jitter`, where `base` is
//! raised once global error pressure crosses the configured threshold so a
//! systemic outage is not hammered at full rate.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Deterministic part of the delay for `attempt` (1-based) under `pressure`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32, pressure: u32) -> Duration {
    let base = if pressure > config.pressure_threshold {
        config.elevated_base_delay_ms
    } else {
        config.base_delay_ms
    };
    let exponent = attempt.saturating_sub(1);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let delay = base.saturating_mul(factor);
    // The elevated base may already exceed the cap; it still applies.
    let cap = config.max_delay_ms.max(base);
    Duration::from_millis(delay.min(cap))
}

/// Jittered retry delays.
#[derive(Clone, Debug)]
pub struct RetryScheduler {
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retry `attempt`, with uniform jitter in `0..=max_jitter`.
    pub fn next_delay(&self, attempt: u32, pressure: u32) -> Duration {
        let delay = backoff_delay(&self.config, attempt, pressure);
        if self.config.max_jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::rng().random_range(0..=self.config.max_jitter_ms);
        delay + Duration::from_millis(jitter)
    }
}
