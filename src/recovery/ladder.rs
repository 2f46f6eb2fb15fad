//! The escalation ladder.

use serde::{Deserialize, Serialize};

use super::health::HealthState;

/// One remediation step, ordered from least to most destructive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LadderStep {
    /// Disable and re-enable the transport with a short settle delay.
    SoftReset,
    /// Same as `SoftReset` with a longer settle delay.
    AggressiveReset,
    /// Flush the local persisted cache, then reset the transport.
    CacheClear,
    /// `CacheClear` plus eviction of process-local lookup caches.
    MemoryCleanup,
    /// Tear the channel down. Only a fresh process recovers from this.
    Terminate,
}

impl LadderStep {
    pub const ALL: [LadderStep; 5] = [
        LadderStep::SoftReset,
        LadderStep::AggressiveReset,
        LadderStep::CacheClear,
        LadderStep::MemoryCleanup,
        LadderStep::Terminate,
    ];

    /// The step for the `attempt`-th escalation (1-based), or `None` once the
    /// ladder is exhausted.
    pub fn for_attempt(attempt: u32) -> Option<LadderStep> {
        let index = attempt.checked_sub(1)? as usize;
        Self::ALL.get(index).copied()
    }

    /// Health level implied by having reached this step.
    pub fn health_floor(&self) -> HealthState {
        match self {
            LadderStep::SoftReset | LadderStep::AggressiveReset => HealthState::Recovering,
            LadderStep::CacheClear | LadderStep::MemoryCleanup | LadderStep::Terminate => {
                HealthState::Corrupted
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LadderStep::Terminate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LadderStep::SoftReset => "soft_reset",
            LadderStep::AggressiveReset => "aggressive_reset",
            LadderStep::CacheClear => "cache_clear",
            LadderStep::MemoryCleanup => "memory_cleanup",
            LadderStep::Terminate => "terminate",
        }
    }
}

impl std::fmt::Display for LadderStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
