//! Subscription registry: at most one live instance per resource key.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::machine::SubscriptionMachine;
use super::types::{CloseReason, Descriptor, SubscriptionId, SubscriptionStats};
use crate::state::SyncState;
use crate::store::{ChannelId, RemoteStore};
use crate::types::ResourceKey;

pub struct SubscriptionRegistry {
    state: Arc<SyncState>,
    store: Arc<dyn RemoteStore>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(state: Arc<SyncState>, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            state,
            store,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new instance for `key`, tearing down any existing one.
    ///
    /// The old entry is removed and the new one inserted under the same
    /// lock, so the table never holds two entries for a key.
    pub(crate) fn register(&self, key: &ResourceKey) -> (SubscriptionId, CancellationToken) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let descriptor = Descriptor::new(id, key.clone());
        let token = descriptor.token.clone();

        let replaced = self
            .state
            .with(|s| s.subscriptions.insert(key.clone(), descriptor));

        if let Some(old) = replaced {
            tracing::debug!(
                key = %key,
                old_id = old.id.0,
                new_id = id.0,
                "replacing existing subscription"
            );
            self.teardown(old, CloseReason::Replaced);
        }

        tracing::debug!(key = %key, subscription_id = id.0, "registered subscription");
        (id, token)
    }

    /// Record the channel now serving `id`. Returns false when the instance
    /// was cancelled or replaced meanwhile; the caller must close the channel.
    pub(crate) fn attach_channel(
        &self,
        id: SubscriptionId,
        key: &ResourceKey,
        channel: ChannelId,
    ) -> bool {
        self.state.with(|s| match s.subscriptions.get_mut(key) {
            Some(d) if d.id == id && !d.token.is_cancelled() => {
                d.channel = Some(channel);
                true
            }
            _ => false,
        })
    }

    pub(crate) fn detach_channel(&self, id: SubscriptionId, key: &ResourceKey) -> Option<ChannelId> {
        self.state.with(|s| match s.subscriptions.get_mut(key) {
            Some(d) if d.id == id => d.channel.take(),
            _ => None,
        })
    }

    /// Mirror the machine's counters into the descriptor.
    pub(crate) fn sync(&self, id: SubscriptionId, key: &ResourceKey, machine: &SubscriptionMachine) {
        self.state.with(|s| {
            if let Some(d) = s.subscriptions.get_mut(key) {
                if d.id == id {
                    d.state = machine.state();
                    d.retry_count = machine.retry_count();
                    d.consecutive_errors = machine.consecutive_errors();
                }
            }
        });
    }

    /// Remove `id` if it is still the registered instance for `key`.
    ///
    /// Returns true exactly once per instance.
    pub(crate) fn unregister(&self, id: SubscriptionId, key: &ResourceKey, reason: CloseReason) -> bool {
        let removed = self.state.with(|s| {
            let current = s.subscriptions.get(key).map(|d| d.id == id).unwrap_or(false);
            if current {
                s.subscriptions.remove(key)
            } else {
                None
            }
        });

        match removed {
            Some(descriptor) => {
                self.teardown(descriptor, reason);
                true
            }
            None => false,
        }
    }

    /// Cancel every registered subscription and reset error pressure.
    /// Channel health is left as it is. Returns the number torn down.
    pub fn teardown_all(&self) -> usize {
        let drained: Vec<Descriptor> = self.state.with(|s| {
            s.error_pressure = 0;
            s.total_errors = 0;
            s.subscriptions.drain().map(|(_, d)| d).collect()
        });
        let count = drained.len();
        for descriptor in drained {
            self.teardown(descriptor, CloseReason::Teardown);
        }
        tracing::info!(count, "tore down all subscriptions");
        count
    }

    fn teardown(&self, descriptor: Descriptor, reason: CloseReason) {
        descriptor.token.cancel();
        if let Some(channel) = descriptor.channel {
            self.store.close_channel(channel);
        }
        tracing::debug!(
            key = %descriptor.key,
            subscription_id = descriptor.id.0,
            reason = ?reason,
            "subscription closed"
        );
    }

    // --- Error pressure ---

    /// Count a channel error. Returns the new global pressure.
    pub(crate) fn record_error(&self) -> u32 {
        self.state.with(|s| {
            s.error_pressure = s.error_pressure.saturating_add(1);
            s.total_errors = s.total_errors.saturating_add(1);
            s.error_pressure
        })
    }

    /// A subscription entered `Live`.
    pub(crate) fn record_live(&self) {
        self.state.with(|s| {
            s.error_pressure = s.error_pressure.saturating_sub(1);
        });
        self.state.mark_success();
    }

    // --- Queries ---

    pub fn is_active(&self, id: SubscriptionId, key: &ResourceKey) -> bool {
        self.state.with(|s| {
            s.subscriptions
                .get(key)
                .map(|d| d.id == id && d.active())
                .unwrap_or(false)
        })
    }

    pub fn active_count(&self) -> usize {
        self.state
            .with(|s| s.subscriptions.values().filter(|d| d.active()).count())
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.state.with(|s| {
            let mut subscriptions: Vec<_> = s.subscriptions.values().map(|d| d.info()).collect();
            subscriptions.sort_by_key(|info| info.id);
            SubscriptionStats {
                active_subscriptions: s.subscriptions.values().filter(|d| d.active()).count(),
                error_count: s.error_pressure,
                total_errors: s.total_errors,
                last_successful_operation: s.last_success.map(|(ts, _)| ts),
                time_since_last_success: s.last_success.map(|(_, at)| at.elapsed()),
                subscriptions,
            }
        })
    }
}
