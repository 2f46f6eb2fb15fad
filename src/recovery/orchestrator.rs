//! Recovery orchestrator: escalates through the ladder when the store
//! reports corrupted subscription state.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::events::{HealthEvent, HealthEvents};
use super::health::{HealthSnapshot, HealthState};
use super::ladder::LadderStep;
use crate::config::RecoveryConfig;
use crate::error::{StoreResult, SyncError};
use crate::ledger::LookupCache;
use crate::state::SyncState;
use crate::store::RemoteStore;
use crate::types::{ResourceKey, Timestamp};

/// What a corruption report resulted in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// This report triggered a ladder step.
    Executed(LadderStep),
    /// Another escalation ran within the cooldown window.
    Suppressed,
    /// The ladder ran out; health is now `failed`.
    Exhausted,
    /// Health was already `failed`; nothing was attempted.
    AlreadyFailed,
}

enum Plan {
    Run {
        step: LadderStep,
        attempt: u32,
        from: HealthState,
        to: HealthState,
    },
    Suppressed { remaining: Duration },
    Exhausted { from: HealthState, attempt: u32 },
    AlreadyFailed,
}

/// Drives the escalation ladder and owns writes to the health record.
pub struct RecoveryOrchestrator {
    state: Arc<SyncState>,
    store: Arc<dyn RemoteStore>,
    cache: Arc<LookupCache>,
    events: Arc<HealthEvents>,
    config: RecoveryConfig,
    /// Serializes corruption reports and ladder steps; held across settle delays.
    escalation: tokio::sync::Mutex<()>,
}

impl RecoveryOrchestrator {
    pub fn new(
        state: Arc<SyncState>,
        store: Arc<dyn RemoteStore>,
        cache: Arc<LookupCache>,
        events: Arc<HealthEvents>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            state,
            store,
            cache,
            events,
            config,
            escalation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        self.state.health()
    }

    /// Handle an internal-corruption report from the subscription on `key`.
    ///
    /// Resolves once the triggered step (or the step already in flight) has
    /// finished, so the caller's retry never races a transport reset.
    pub async fn handle_corruption(&self, key: &ResourceKey) -> RecoveryOutcome {
        // Held across planning so a concurrent report waits out the step.
        let _guard = self.escalation.lock().await;
        let outcome = match self.plan_escalation() {
            Plan::AlreadyFailed => {
                tracing::debug!(key = %key, "health already failed, skipping recovery");
                RecoveryOutcome::AlreadyFailed
            }
            Plan::Suppressed { remaining } => {
                tracing::warn!(
                    key = %key,
                    cooldown_remaining_ms = remaining.as_millis() as u64,
                    "corruption reported within recovery cooldown, suppressing escalation"
                );
                RecoveryOutcome::Suppressed
            }
            Plan::Exhausted { from, attempt } => {
                tracing::error!(
                    key = %key,
                    attempt,
                    "recovery ladder exhausted, channel marked failed"
                );
                self.events.broadcast(HealthEvent::StateChanged {
                    from,
                    to: HealthState::Failed,
                });
                self.events.broadcast(HealthEvent::ReloadRequired {
                    reason: "automatic recovery exhausted".to_string(),
                });
                RecoveryOutcome::Exhausted
            }
            Plan::Run {
                step,
                attempt,
                from,
                to,
            } => {
                if from != to {
                    self.events.broadcast(HealthEvent::StateChanged { from, to });
                }
                tracing::info!(key = %key, step = %step, attempt, "running recovery step");
                if !self.run_step(step, attempt).await {
                    tracing::warn!(key = %key, step = %step, "recovery step did not complete cleanly");
                }
                if step.is_terminal() {
                    self.state.with(|s| s.health.reload_required = true);
                    self.events.broadcast(HealthEvent::ReloadRequired {
                        reason: "channel terminated".to_string(),
                    });
                }
                RecoveryOutcome::Executed(step)
            }
        };
        tracing::debug!(key = %key, outcome = ?outcome, "corruption report handled");
        outcome
    }

    /// Decide, atomically with the health record, what this report does.
    fn plan_escalation(&self) -> Plan {
        let cooldown = self.config.cooldown();
        self.state.with(|s| {
            let health = &mut s.health;
            if health.state == HealthState::Failed {
                return Plan::AlreadyFailed;
            }

            let now = Instant::now();
            if let Some(last) = health.last_recovery_at {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < cooldown {
                    return Plan::Suppressed {
                        remaining: cooldown - elapsed,
                    };
                }
            }

            health.recovery_attempts += 1;
            health.last_recovery_at = Some(now);
            health.last_recovery_time = Some(Timestamp::now());
            let attempt = health.recovery_attempts;
            let from = health.state;

            match LadderStep::for_attempt(attempt) {
                Some(step) => {
                    health.state = from.max(step.health_floor());
                    Plan::Run {
                        step,
                        attempt,
                        from,
                        to: health.state,
                    }
                }
                None => {
                    health.state = HealthState::Failed;
                    health.reload_required = true;
                    Plan::Exhausted { from, attempt }
                }
            }
        })
    }

    /// Execute `step` and report it. Returns whether every primitive succeeded.
    async fn run_step(&self, step: LadderStep, attempt: u32) -> bool {
        let result = self.execute(step).await;
        let succeeded = match &result {
            Ok(()) => true,
            Err(failure) => {
                tracing::warn!(step = %step, error = %failure, "recovery step failed");
                false
            }
        };
        self.events.broadcast(HealthEvent::StepExecuted {
            step,
            attempt,
            succeeded,
        });
        succeeded
    }

    async fn execute(&self, step: LadderStep) -> StoreResult<()> {
        match step {
            LadderStep::SoftReset => self.reset_transport(self.config.soft_settle_ms).await,
            LadderStep::AggressiveReset => {
                self.reset_transport(self.config.aggressive_settle_ms).await
            }
            LadderStep::CacheClear => {
                self.store.clear_local_cache().await?;
                self.reset_transport(self.config.cache_clear_settle_ms).await
            }
            LadderStep::MemoryCleanup => {
                let evicted = self.cache.clear();
                tracing::debug!(evicted, "evicted process-local lookup cache");
                self.store.clear_local_cache().await?;
                self.reset_transport(self.config.cache_clear_settle_ms).await
            }
            LadderStep::Terminate => self.store.terminate_channel().await,
        }
    }

    /// Disable, settle, re-enable. Re-enabling is attempted even when
    /// disabling failed so the transport is never left off.
    async fn reset_transport(&self, settle_ms: u64) -> StoreResult<()> {
        let disabled = self.store.disable_transport().await;
        tokio::time::sleep(Duration::from_millis(settle_ms)).await;
        let enabled = self.store.enable_transport().await;
        disabled.and(enabled)
    }

    // --- Resume signals ---

    /// A subscription delivered clean data. Clears recovery tracking when the
    /// channel was recovering; a `failed` channel stays failed.
    pub fn note_clean_delivery(&self) {
        let changed = self.state.with(|s| {
            let health = &mut s.health;
            match health.state {
                HealthState::Recovering | HealthState::Corrupted => {
                    let from = health.state;
                    health.state = HealthState::Healthy;
                    health.recovery_attempts = 0;
                    Some(from)
                }
                HealthState::Healthy | HealthState::Failed => None,
            }
        });

        if let Some(from) = changed {
            tracing::info!(from = %from, "clean delivery observed, channel healthy again");
            self.events.broadcast(HealthEvent::StateChanged {
                from,
                to: HealthState::Healthy,
            });
            self.events.broadcast(HealthEvent::Reset { manual: false });
        }
    }

    /// Operator reset: clear tracking and return to `healthy` without
    /// touching the channel.
    pub fn reset_tracking(&self) {
        let from = self.state.with(|s| {
            let health = &mut s.health;
            let from = health.state;
            health.state = HealthState::Healthy;
            health.recovery_attempts = 0;
            health.last_recovery_at = None;
            health.reload_required = false;
            from
        });
        tracing::info!(from = %from, "recovery tracking reset by operator");
        if from != HealthState::Healthy {
            self.events.broadcast(HealthEvent::StateChanged {
                from,
                to: HealthState::Healthy,
            });
        }
        self.events.broadcast(HealthEvent::Reset { manual: true });
    }

    /// Operator-triggered step. Runs `step` directly, then resets tracking
    /// to `healthy` regardless of which step ran.
    pub async fn emergency_reset(&self, step: LadderStep) -> crate::error::Result<()> {
        let result = {
            let _guard = self.escalation.lock().await;
            tracing::info!(step = %step, "running operator-requested recovery step");
            let attempt = self.state.with(|s| s.health.recovery_attempts);
            let result = self.execute(step).await;
            self.events.broadcast(HealthEvent::StepExecuted {
                step,
                attempt,
                succeeded: result.is_ok(),
            });
            result
        };

        self.reset_tracking();

        if step.is_terminal() {
            self.state.with(|s| s.health.reload_required = true);
            self.events.broadcast(HealthEvent::ReloadRequired {
                reason: "channel terminated by operator".to_string(),
            });
        }

        result.map_err(|failure| {
            tracing::warn!(step = %step, error = %failure, "operator recovery step failed");
            SyncError::Unavailable(format!("recovery step {} failed", step))
        })
    }
}
