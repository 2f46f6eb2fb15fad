//! The single owned process-wide state of the sync subsystem.
//!
//! The subscription table, the health record, and the error-pressure counter
//! live behind one mutex so every mutation to them happens atomically with
//! respect to the others. The lock is never held across an `.await`.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::time::Instant;

use crate::recovery::{HealthRecord, HealthSnapshot};
use crate::subscriptions::Descriptor;
use crate::types::{ResourceKey, Timestamp};

/// Everything guarded by [`SyncState`].
pub(crate) struct ProcessState {
    pub subscriptions: HashMap<ResourceKey, Descriptor>,
    pub health: HealthRecord,
    /// Global error pressure; raised per channel error, lowered per recovery.
    pub error_pressure: u32,
    /// Channel errors observed since the last teardown.
    pub total_errors: u64,
    pub last_success: Option<(Timestamp, Instant)>,
}

/// Shared handle to the process-wide state.
pub struct SyncState {
    inner: Mutex<ProcessState>,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ProcessState {
                subscriptions: HashMap::new(),
                health: HealthRecord::new(),
                error_pressure: 0,
                total_errors: 0,
                last_success: None,
            }),
        }
    }

    /// Run `f` with exclusive access. `f` must not block.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut ProcessState) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    pub fn health(&self) -> HealthSnapshot {
        self.inner.lock().health.snapshot()
    }

    pub fn error_pressure(&self) -> u32 {
        self.inner.lock().error_pressure
    }

    /// Record a successful operation for diagnostics.
    pub fn mark_success(&self) {
        self.inner.lock().last_success = Some((Timestamp::now(), Instant::now()));
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::HealthState;

    #[test]
    fn test_initial_state() {
        let state = SyncState::new();
        assert_eq!(state.health().state, HealthState::Healthy);
        assert_eq!(state.error_pressure(), 0);
        state.with(|s| {
            assert!(s.subscriptions.is_empty());
            assert!(s.last_success.is_none());
        });
    }

    #[test]
    fn test_mark_success() {
        let state = SyncState::new();
        state.mark_success();
        assert!(state.with(|s| s.last_success.is_some()));
    }
}
