//! The sync service facade used by the UI layer.

use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::ledger::{LedgerEngine, LookupCache, MembershipOutcome, NewEntry};
use crate::recovery::{
    HealthEvents, HealthSnapshot, HealthState, HealthWatch, LadderStep, RecoveryOrchestrator,
};
use crate::retry::RetryScheduler;
use crate::state::SyncState;
use crate::store::RemoteStore;
use crate::subscriptions::{
    Payload, PayloadCallback, SubscriptionHandle, SubscriptionMachine, SubscriptionRegistry,
    SubscriptionStats, SubscriptionWorker,
};
use crate::types::{LedgerEntry, Pocket, PocketId, ResourceKey, Role, UserId};

/// Entry point for realtime sync, recovery, and ledger mutations.
///
/// All components share one [`SyncState`]. Subscription methods spawn onto
/// the current tokio runtime and must be called from within one.
pub struct SyncService {
    config: SyncConfig,
    state: Arc<SyncState>,
    store: Arc<dyn RemoteStore>,
    registry: Arc<SubscriptionRegistry>,
    orchestrator: Arc<RecoveryOrchestrator>,
    events: Arc<HealthEvents>,
    ledger: LedgerEngine,
}

impl SyncService {
    pub fn new(store: Arc<dyn RemoteStore>, config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(SyncState::new());
        let cache = Arc::new(LookupCache::new(config.ledger.lookup_cache_size));
        let events = Arc::new(HealthEvents::new(config.subscriptions.health_event_buffer));
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&state),
            Arc::clone(&store),
        ));
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            Arc::clone(&state),
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&events),
            config.recovery.clone(),
        ));
        let ledger = LedgerEngine::new(
            Arc::clone(&store),
            cache,
            config.ledger.clone(),
            config.rate_limits.clone(),
        );

        Ok(Self {
            config,
            state,
            store,
            registry,
            orchestrator,
            events,
            ledger,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // --- Subscriptions ---

    /// Live view of a pocket. `callback` receives `None` when the pocket does
    /// not exist or the subscription gave up.
    pub fn subscribe_to_pocket<F>(&self, pocket_id: PocketId, callback: F) -> SubscriptionHandle
    where
        F: Fn(Option<Pocket>) + Send + Sync + 'static,
    {
        self.subscribe(
            ResourceKey::pocket(pocket_id),
            Arc::new(move |payload: Payload| {
                if let Payload::Pocket(pocket) = payload {
                    callback(pocket);
                }
            }),
        )
    }

    /// Live view of a pocket's transaction log, newest first.
    pub fn subscribe_to_transactions<F>(
        &self,
        pocket_id: PocketId,
        callback: F,
    ) -> SubscriptionHandle
    where
        F: Fn(Vec<LedgerEntry>) + Send + Sync + 'static,
    {
        self.subscribe(
            ResourceKey::transactions(pocket_id),
            Arc::new(move |payload: Payload| {
                if let Payload::Transactions(entries) = payload {
                    callback(entries);
                }
            }),
        )
    }

    fn subscribe(&self, key: ResourceKey, callback: PayloadCallback) -> SubscriptionHandle {
        let (id, token) = self.registry.register(&key);
        let worker = SubscriptionWorker {
            id,
            key: key.clone(),
            token,
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            orchestrator: Arc::clone(&self.orchestrator),
            retry: RetryScheduler::new(self.config.retry.clone()),
            machine: SubscriptionMachine::new(
                self.config.retry.max_retries,
                self.config.subscriptions.max_decode_errors,
            ),
            callback,
        };
        tokio::spawn(worker.run());

        SubscriptionHandle {
            id,
            key,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Cancel every subscription and reset error pressure. Health is kept.
    pub fn cleanup_all_subscriptions(&self) -> usize {
        self.registry.teardown_all()
    }

    // --- Mutations ---

    /// Mutations are refused once the channel was terminated, until an
    /// operator reset.
    fn ensure_usable(&self) -> Result<()> {
        if self.state.health().reload_required {
            tracing::warn!("mutation refused, channel awaiting reload");
            return Err(SyncError::ChannelTerminated);
        }
        Ok(())
    }

    pub async fn add_transaction(&self, entry: NewEntry) -> Result<LedgerEntry> {
        self.ensure_usable()?;
        let created = self.ledger.add_transaction(entry).await?;
        self.state.mark_success();
        Ok(created)
    }

    pub async fn create_pocket(&self, user: &UserId, role: Role, name: &str) -> Result<Pocket> {
        self.ensure_usable()?;
        let pocket = self.ledger.create_pocket(user, role, name).await?;
        self.state.mark_success();
        Ok(pocket)
    }

    pub async fn join_pocket(&self, invite_code: &str, user: &UserId, role: Role) -> Result<Pocket> {
        self.ensure_usable()?;
        let pocket = self.ledger.join_pocket(invite_code, user, role).await?;
        self.state.mark_success();
        Ok(pocket)
    }

    pub async fn leave_pocket(&self, pocket_id: &PocketId, user: &UserId) -> Result<MembershipOutcome> {
        self.ensure_usable()?;
        let outcome = self.ledger.leave_pocket(pocket_id, user).await?;
        self.state.mark_success();
        Ok(outcome)
    }

    pub async fn delete_pocket(&self, pocket_id: &PocketId, user: &UserId) -> Result<MembershipOutcome> {
        self.ensure_usable()?;
        let outcome = self.ledger.delete_pocket(pocket_id, user).await?;
        self.state.mark_success();
        Ok(outcome)
    }

    pub async fn pocket(&self, pocket_id: &PocketId) -> Result<Option<Pocket>> {
        self.ledger.pocket(pocket_id).await
    }

    // --- Health and diagnostics ---

    pub fn subscription_health_state(&self) -> HealthState {
        self.state.health().state
    }

    pub fn subscription_health(&self) -> HealthSnapshot {
        self.state.health()
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.registry.stats()
    }

    /// Operator reset of recovery tracking.
    pub fn reset_recovery_tracking(&self) {
        self.orchestrator.reset_tracking();
    }

    /// Operator-triggered ladder step, followed by a tracking reset.
    pub async fn emergency_reset(&self, step: LadderStep) -> Result<()> {
        self.orchestrator.emergency_reset(step).await
    }

    pub fn watch_health(&self) -> HealthWatch {
        self.events.watch()
    }

    pub fn unwatch_health(&self, watch: &HealthWatch) {
        self.events.unwatch(watch.id);
    }
}
