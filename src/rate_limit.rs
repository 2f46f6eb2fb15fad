//! Per-user admission limits for mutations.
//!
//! Sliding-window limiter: each `(action, user)` pair keeps the instants of
//! its admitted requests inside the window. Rejected requests are not
//! recorded, so a caller hammering a closed window does not extend it.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{RateLimitConfig, WindowLimit};
use crate::error::{Result, SyncError};
use crate::types::UserId;

/// A rate-limited mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateAction {
    AddTransaction,
    JoinPocket,
    CreatePocket,
}

impl RateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateAction::AddTransaction => "add_transaction",
            RateAction::JoinPocket => "join_pocket",
            RateAction::CreatePocket => "create_pocket",
        }
    }
}

impl fmt::Display for RateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(RateAction, UserId), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, action: RateAction) -> WindowLimit {
        match action {
            RateAction::AddTransaction => self.config.add_transaction,
            RateAction::JoinPocket => self.config.join_pocket,
            RateAction::CreatePocket => self.config.create_pocket,
        }
    }

    /// Admit one `action` by `user` now, or fail with the time to wait.
    pub fn check(&self, action: RateAction, user: &UserId) -> Result<()> {
        self.check_at(action, user, Instant::now())
    }

    pub fn check_at(&self, action: RateAction, user: &UserId, now: Instant) -> Result<()> {
        let limit = self.limit_for(action);
        let window = limit.window();
        let mut windows = self.windows.lock();

        // Drop pairs whose window has fully drained.
        windows.retain(|(a, _), hits| {
            prune(hits, now, self.limit_for(*a).window());
            !hits.is_empty()
        });
        let hits = windows.entry((action, user.clone())).or_default();

        if hits.len() >= limit.max_requests as usize {
            let retry_after = hits
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(Duration::ZERO);
            tracing::warn!(
                action = %action,
                user = %user,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
            return Err(SyncError::RateLimited { retry_after });
        }

        hits.push_back(now);
        Ok(())
    }

    /// Forget all recorded requests.
    pub fn clear(&self) {
        self.windows.lock().clear();
    }

    /// Requests currently counted against `user` for `action`.
    pub fn in_window(&self, action: RateAction, user: &UserId) -> usize {
        self.windows
            .lock()
            .get(&(action, user.clone()))
            .map(|hits| hits.len())
            .unwrap_or(0)
    }
}

fn prune(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = hits.front() {
        if now.saturating_duration_since(*oldest) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}
