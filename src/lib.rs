//! # Pocket Sync
//!
//! Realtime synchronization, fault recovery, and atomic ledger mutations for
//! shared expense pockets backed by a remote multi-writer document store.
//!
//! ## Core Concepts
//!
//! - **Subscriptions**: One live push channel per resource, retried with
//!   jittered exponential backoff and deduplicated by resource key
//! - **Classification**: Store failures are labelled transient, permission,
//!   validation, or internal corruption
//! - **Recovery**: Corruption walks an escalating ladder of channel resets,
//!   rate-limited by a cooldown, and tracked as process-wide health
//! - **Ledger**: Every balance change commits atomically with its entry
//!
//! ## Example
//!
//! ```ignore
//! use pocket_sync::{MemoryStore, NewEntry, SyncConfig, SyncService, EntryKind, Role, UserId};
//! use std::sync::Arc;
//!
//! let service = SyncService::new(Arc::new(MemoryStore::new()), SyncConfig::default())?;
//! let alice = UserId::new("alice");
//! let pocket = service.create_pocket(&alice, Role::Provider, "Household").await?;
//!
//! let handle = service.subscribe_to_transactions(pocket.id.clone(), |entries| {
//!     println!("{} entries", entries.len());
//! });
//!
//! service.add_transaction(NewEntry {
//!     pocket_id: pocket.id.clone(),
//!     user_id: alice.clone(),
//!     kind: EntryKind::Fund,
//!     category: None,
//!     description: "seed".into(),
//!     amount: 100.0,
//!     date: None,
//! }).await?;
//!
//! handle.cancel();
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod ledger;
pub mod rate_limit;
pub mod recovery;
pub mod retry;
pub mod service;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use classify::{classify, classify_error, FailureKind};
pub use config::{
    LedgerConfig, RateLimitConfig, RecoveryConfig, RetryConfig, SubscriptionConfig, SyncConfig,
    WindowLimit,
};
pub use error::{FailureCode, Result, StoreFailure, StoreResult, SyncError};
pub use ledger::{LedgerEngine, LookupCache, MembershipOutcome, NewEntry};
pub use rate_limit::{RateAction, RateLimiter};
pub use recovery::{
    HealthEvent, HealthEvents, HealthSnapshot, HealthState, HealthWatch, LadderStep,
    RecoveryOrchestrator, RecoveryOutcome, WatchId,
};
pub use retry::{backoff_delay, RetryScheduler};
pub use service::SyncService;
pub use state::SyncState;
pub use store::{
    BatchWrite, Channel, ChannelEvent, ChannelId, ChannelTarget, Collection, DocPath, Document,
    MemoryStore, RemoteStore, StoreCall, StoreTransaction,
};
pub use subscriptions::{
    CloseReason, Payload, SubscriptionHandle, SubscriptionId, SubscriptionInfo,
    SubscriptionRegistry, SubscriptionState, SubscriptionStats,
};
pub use types::*;
