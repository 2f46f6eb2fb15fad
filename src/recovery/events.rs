//! Health event broadcasting for UI listeners.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::health::HealthState;
use super::ladder::LadderStep;

/// Events emitted as channel health changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthEvent {
    /// Health state moved.
    StateChanged { from: HealthState, to: HealthState },

    /// A ladder step ran (automatically or on operator request).
    StepExecuted {
        step: LadderStep,
        attempt: u32,
        succeeded: bool,
    },

    /// Automatic recovery cannot continue; the operator should reload.
    ReloadRequired { reason: String },

    /// Recovery tracking was reset.
    Reset { manual: bool },
}

/// Unique identifier for a health listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Handle for receiving health events.
pub struct HealthWatch {
    pub id: WatchId,
    pub receiver: Receiver<HealthEvent>,
}

impl HealthWatch {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<HealthEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<HealthEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<HealthEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Fans health events out to listeners over bounded queues.
///
/// A listener whose queue is full is dropped rather than blocking the
/// orchestrator.
pub struct HealthEvents {
    watchers: RwLock<HashMap<WatchId, Sender<HealthEvent>>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl HealthEvents {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn watch(&self) -> HealthWatch {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        self.watchers.write().insert(id, sender);
        HealthWatch { id, receiver }
    }

    pub fn unwatch(&self, id: WatchId) {
        self.watchers.write().remove(&id);
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }

    /// Send `event` to every listener, dropping those that cannot keep up.
    pub fn broadcast(&self, event: HealthEvent) {
        let mut to_remove = Vec::new();

        {
            let watchers = self.watchers.read();
            for (id, sender) in watchers.iter() {
                if sender.try_send(event.clone()).is_err() {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut watchers = self.watchers.write();
            for id in to_remove {
                watchers.remove(&id);
                tracing::debug!(watch_id = id.0, "dropped health listener");
            }
        }
    }
}
