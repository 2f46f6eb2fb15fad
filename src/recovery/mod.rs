//! Channel health tracking and the escalating recovery ladder.
//!
//! When the store reports that its subscription machinery has corrupted
//! internal state, ordinary retries cannot help. The orchestrator walks a
//! fixed ladder of progressively destructive remediations, at most one per
//! cooldown window, and publishes every transition as a [`HealthEvent`].

mod events;
mod health;
mod ladder;
mod orchestrator;

pub use events::{HealthEvent, HealthEvents, HealthWatch, WatchId};
pub(crate) use health::HealthRecord;
pub use health::{HealthSnapshot, HealthState};
pub use ladder::LadderStep;
pub use orchestrator::{RecoveryOrchestrator, RecoveryOutcome};
