//! Configuration for the sync subsystem.
//!
//! Every section has working defaults; a partial JSON document overrides
//! only the fields it names. Durations are expressed in milliseconds.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Maximum number of writes the store accepts in one batch commit.
pub const STORE_MAX_BATCH_WRITES: usize = 500;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub subscriptions: SubscriptionConfig,
    pub ledger: LedgerConfig,
    pub rate_limits: RateLimitConfig,
}

impl SyncConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Reject settings that would break the retry or ledger invariants.
    pub fn validate(&self) -> Result<()> {
        if self.retry.base_delay_ms == 0 {
            return Err(SyncError::Config("retry.base_delay_ms must be positive".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(SyncError::Config(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }
        if self.retry.elevated_base_delay_ms < self.retry.base_delay_ms {
            return Err(SyncError::Config(
                "retry.elevated_base_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }
        if self.subscriptions.max_decode_errors == 0 {
            return Err(SyncError::Config(
                "subscriptions.max_decode_errors must be positive".into(),
            ));
        }
        if self.ledger.max_amount_cents <= 0 {
            return Err(SyncError::Config("ledger.max_amount_cents must be positive".into()));
        }
        if self.ledger.max_commit_attempts == 0 {
            return Err(SyncError::Config("ledger.max_commit_attempts must be positive".into()));
        }
        if self.ledger.delete_batch_size == 0
            || self.ledger.delete_batch_size > STORE_MAX_BATCH_WRITES
        {
            return Err(SyncError::Config(format!(
                "ledger.delete_batch_size must be in 1..={}",
                STORE_MAX_BATCH_WRITES
            )));
        }
        if self.ledger.lookup_cache_size == 0 {
            return Err(SyncError::Config("ledger.lookup_cache_size must be positive".into()));
        }
        for (name, limit) in [
            ("add_transaction", &self.rate_limits.add_transaction),
            ("join_pocket", &self.rate_limits.join_pocket),
            ("create_pocket", &self.rate_limits.create_pocket),
        ] {
            if limit.max_requests == 0 || limit.window_ms == 0 {
                return Err(SyncError::Config(format!(
                    "rate_limits.{} must allow at least one request per non-empty window",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Backoff parameters for subscription retries.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// First retry delay under normal conditions.
    pub base_delay_ms: u64,
    /// First retry delay once global error pressure exceeds the threshold.
    pub elevated_base_delay_ms: u64,
    /// Error pressure above which the elevated base applies.
    pub pressure_threshold: u32,
    /// Cap on the exponential component.
    pub max_delay_ms: u64,
    /// Upper bound of the uniform random jitter added to every delay.
    pub max_jitter_ms: u64,
    /// Retries per subscription instance before it closes.
    pub max_retries: u32,
    /// Fixed extra delay after an internal-corruption recovery.
    pub corruption_extra_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            elevated_base_delay_ms: 5_000,
            pressure_threshold: 10,
            max_delay_ms: 30_000,
            max_jitter_ms: 1_000,
            max_retries: 5,
            corruption_extra_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    pub fn corruption_extra_delay(&self) -> Duration {
        Duration::from_millis(self.corruption_extra_delay_ms)
    }
}

/// Recovery ladder timings.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Window during which new escalations are suppressed.
    pub cooldown_ms: u64,
    pub soft_settle_ms: u64,
    pub aggressive_settle_ms: u64,
    pub cache_clear_settle_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 5_000,
            soft_settle_ms: 100,
            aggressive_settle_ms: 1_000,
            cache_clear_settle_ms: 500,
        }
    }
}

impl RecoveryConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Subscription behaviour.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Consecutive payload decode failures that force a re-subscribe.
    pub max_decode_errors: u32,
    /// Buffer per health-event listener before it is dropped.
    pub health_event_buffer: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_decode_errors: 3,
            health_event_buffer: 64,
        }
    }
}

/// Ledger mutation limits.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Largest accepted amount, in cents.
    pub max_amount_cents: i64,
    pub max_description_len: usize,
    pub max_category_len: usize,
    pub max_name_len: usize,
    /// Commit attempts for one atomic mutation before surfacing a conflict.
    pub max_commit_attempts: u32,
    /// Deletes per batch commit when purging a transaction log.
    pub delete_batch_size: usize,
    /// Entries kept in the invite-code lookup cache.
    pub lookup_cache_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_amount_cents: 100_000_000, // 1,000,000.00
            max_description_len: 200,
            max_category_len: 50,
            max_name_len: 60,
            max_commit_attempts: 5,
            delete_batch_size: 400,
            lookup_cache_size: 256,
        }
    }
}

/// A sliding-window admission limit.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct WindowLimit {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl WindowLimit {
    pub const fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Per-action admission limits, applied per user.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub add_transaction: WindowLimit,
    pub join_pocket: WindowLimit,
    pub create_pocket: WindowLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            add_transaction: WindowLimit::new(20, 60_000),
            join_pocket: WindowLimit::new(5, 300_000),
            create_pocket: WindowLimit::new(5, 300_000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        SyncConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_overrides_only_named_fields() {
        let config = SyncConfig::from_json_str(
            r#"{"retry": {"max_retries": 2}, "recovery": {"cooldown_ms": 60000}}"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.recovery.cooldown(), Duration::from_secs(60));
        assert_eq!(config.ledger.delete_batch_size, 400);
    }

    #[test]
    fn test_rejects_oversized_delete_batch() {
        let result = SyncConfig::from_json_str(r#"{"ledger": {"delete_batch_size": 501}}"#);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_rejects_cap_below_base() {
        let result =
            SyncConfig::from_json_str(r#"{"retry": {"base_delay_ms": 500, "max_delay_ms": 100}}"#);
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rate_limits": {{"join_pocket": {{"max_requests": 1, "window_ms": 1000}}}}}}"#
        )
        .unwrap();

        let config = SyncConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.rate_limits.join_pocket.max_requests, 1);
        assert_eq!(config.rate_limits.add_transaction.max_requests, 20);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = SyncConfig::from_json_file("/nonexistent/pocket-sync.json");
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
