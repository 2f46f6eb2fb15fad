//! Subscription types.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::registry::SubscriptionRegistry;
use crate::store::ChannelId;
use crate::types::{LedgerEntry, Pocket, PocketId, ResourceKey, ResourceKind, Timestamp};

/// Unique identifier for a subscription instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(pub u64);

/// Lifecycle of one subscription instance.
///
/// `Pending -> Live -> (Erroring -> Pending)* -> Closed`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Channel requested, nothing delivered yet.
    Pending,
    /// At least one payload delivered on the current channel.
    Live,
    /// Channel failed; a retry is being scheduled.
    Erroring,
    /// Cancelled or out of retries. Terminal.
    Closed,
}

impl SubscriptionState {
    pub fn is_active(&self) -> bool {
        !matches!(self, SubscriptionState::Closed)
    }
}

/// Why a subscription instance stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The caller invoked its cancellation handle.
    Cancelled,
    /// A newer instance for the same resource took its place.
    Replaced,
    /// The retry budget ran out.
    RetriesExhausted,
    /// Process-wide teardown.
    Teardown,
}

/// Registry entry. Owned by the registry; callers hold only a handle.
pub(crate) struct Descriptor {
    pub id: SubscriptionId,
    pub key: ResourceKey,
    pub token: CancellationToken,
    pub channel: Option<ChannelId>,
    pub state: SubscriptionState,
    pub retry_count: u32,
    pub consecutive_errors: u32,
    pub created_at: Timestamp,
}

impl Descriptor {
    pub fn new(id: SubscriptionId, key: ResourceKey) -> Self {
        Self {
            id,
            key,
            token: CancellationToken::new(),
            channel: None,
            state: SubscriptionState::Pending,
            retry_count: 0,
            consecutive_errors: 0,
            created_at: Timestamp::now(),
        }
    }

    pub fn active(&self) -> bool {
        self.state.is_active() && !self.token.is_cancelled()
    }

    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            kind: self.key.kind,
            pocket_id: self.key.id.clone(),
            state: self.state,
            active: self.active(),
            retry_count: self.retry_count,
            consecutive_errors: self.consecutive_errors,
            created_at: self.created_at,
        }
    }
}

/// A decoded delivery.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// The pocket document, or `None` when it does not exist.
    Pocket(Option<Pocket>),
    /// The transaction log, newest first.
    Transactions(Vec<LedgerEntry>),
}

impl Payload {
    /// The empty result delivered when a subscription gives up.
    pub fn empty(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Pocket => Payload::Pocket(None),
            ResourceKind::Transactions => Payload::Transactions(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Pocket(pocket) => pocket.is_none(),
            Payload::Transactions(entries) => entries.is_empty(),
        }
    }
}

/// Caller's cancellation handle.
///
/// Dropping the handle does not cancel the subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    pub(crate) id: SubscriptionId,
    pub(crate) key: ResourceKey,
    pub(crate) registry: Arc<SubscriptionRegistry>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Cancel the subscription. Returns false if it was already closed.
    pub fn cancel(&self) -> bool {
        self.registry
            .unregister(self.id, &self.key, CloseReason::Cancelled)
    }

    /// Whether this instance is still the registered one and not closed.
    pub fn is_active(&self) -> bool {
        self.registry.is_active(self.id, &self.key)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

/// Diagnostic view of one registry entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub kind: ResourceKind,
    pub pocket_id: PocketId,
    pub state: SubscriptionState,
    pub active: bool,
    pub retry_count: u32,
    pub consecutive_errors: u32,
    pub created_at: Timestamp,
}

/// Aggregate subscription diagnostics.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    pub active_subscriptions: usize,
    /// Current global error pressure.
    pub error_count: u32,
    /// Channel errors since the last teardown.
    pub total_errors: u64,
    pub last_successful_operation: Option<Timestamp>,
    pub time_since_last_success: Option<Duration>,
    pub subscriptions: Vec<SubscriptionInfo>,
}
