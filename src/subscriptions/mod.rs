//! Live subscriptions to remote pocket state.
//!
//! Each subscription instance is a spawned task that owns one push channel
//! at a time:
//! - Decoded snapshots are forwarded to the caller's callback in order
//! - Channel failures are classified, and corruption is handed to the
//!   recovery orchestrator before any retry
//! - Retries back off exponentially; an exhausted budget delivers one empty
//!   result and closes the instance
//!
//! The registry guarantees at most one instance per resource key.

mod decode;
mod machine;
mod registry;
mod types;
mod worker;

pub use decode::{decode_payload, sort_newest_first};
pub use machine::{DecodeVerdict, Delivery, FailureVerdict, SubscriptionMachine};
pub use registry::SubscriptionRegistry;
pub(crate) use types::Descriptor;
pub use types::{
    CloseReason, Payload, SubscriptionHandle, SubscriptionId, SubscriptionInfo, SubscriptionState,
    SubscriptionStats,
};
pub use worker::PayloadCallback;
pub(crate) use worker::SubscriptionWorker;
