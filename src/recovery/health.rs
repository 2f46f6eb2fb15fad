//! Process-wide channel health.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::types::Timestamp;

/// Degradation level of the channel's subscription machinery.
///
/// Ordered from best to worst; escalation only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Recovering,
    Corrupted,
    Failed,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Recovering => "recovering",
            HealthState::Corrupted => "corrupted",
            HealthState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable health record. Only the recovery orchestrator writes it.
#[derive(Clone, Debug)]
pub(crate) struct HealthRecord {
    pub state: HealthState,
    pub recovery_attempts: u32,
    pub last_recovery_time: Option<Timestamp>,
    /// Monotonic mark of the last escalation, for the cooldown window.
    pub last_recovery_at: Option<Instant>,
    pub reload_required: bool,
}

impl HealthRecord {
    pub fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            recovery_attempts: 0,
            last_recovery_time: None,
            last_recovery_at: None,
            reload_required: false,
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.state,
            recovery_attempts: self.recovery_attempts,
            last_recovery_time: self.last_recovery_time,
            reload_required: self.reload_required,
        }
    }
}

/// Read-only view of channel health for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub recovery_attempts: u32,
    pub last_recovery_time: Option<Timestamp>,
    /// Set once the channel has been terminated or the ladder ran out.
    pub reload_required: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_degrade_forward() {
        assert!(HealthState::Healthy < HealthState::Recovering);
        assert!(HealthState::Recovering < HealthState::Corrupted);
        assert!(HealthState::Corrupted < HealthState::Failed);
        assert_eq!(
            HealthState::Corrupted.max(HealthState::Recovering),
            HealthState::Corrupted
        );
    }

    #[test]
    fn test_new_record_is_healthy() {
        let snapshot = HealthRecord::new().snapshot();
        assert_eq!(snapshot.state, HealthState::Healthy);
        assert_eq!(snapshot.recovery_attempts, 0);
        assert!(!snapshot.reload_required);
    }
}
