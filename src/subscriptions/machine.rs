//! Per-subscription state machine.
//!
//! Pure transition logic with no I/O, so every edge of the lifecycle can be
//! exercised without a channel or a timer.

use super::types::SubscriptionState;

/// Outcome of a successful delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// First delivery on this channel: the instance just entered `Live`.
    BecameLive,
    Delivered,
}

/// Outcome of a payload that failed to decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeVerdict {
    /// Below the threshold; keep the channel.
    Tolerated { consecutive: u32 },
    /// Threshold reached; drop the channel and re-subscribe.
    Resubscribe,
}

/// Outcome of a channel failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Schedule retry number `attempt` (1-based).
    Retry { attempt: u32 },
    /// Retry budget exhausted; the instance is now `Closed`.
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct SubscriptionMachine {
    state: SubscriptionState,
    retry_count: u32,
    consecutive_errors: u32,
    max_retries: u32,
    max_decode_errors: u32,
}

impl SubscriptionMachine {
    pub fn new(max_retries: u32, max_decode_errors: u32) -> Self {
        Self {
            state: SubscriptionState::Pending,
            retry_count: 0,
            consecutive_errors: 0,
            max_retries,
            max_decode_errors: max_decode_errors.max(1),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn is_closed(&self) -> bool {
        self.state == SubscriptionState::Closed
    }

    /// A new channel is being opened.
    pub fn begin_attempt(&mut self) {
        if !self.is_closed() {
            self.state = SubscriptionState::Pending;
        }
    }

    /// A payload decoded cleanly.
    pub fn on_delivery(&mut self) -> Delivery {
        let was_live = self.state == SubscriptionState::Live;
        self.state = SubscriptionState::Live;
        self.retry_count = 0;
        self.consecutive_errors = 0;
        if was_live {
            Delivery::Delivered
        } else {
            Delivery::BecameLive
        }
    }

    /// A payload arrived but could not be decoded.
    pub fn on_decode_error(&mut self) -> DecodeVerdict {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.max_decode_errors {
            DecodeVerdict::Resubscribe
        } else {
            DecodeVerdict::Tolerated {
                consecutive: self.consecutive_errors,
            }
        }
    }

    /// The channel failed (or was dropped for malformed data).
    pub fn on_failure(&mut self) -> FailureVerdict {
        self.retry_count += 1;
        self.consecutive_errors = 0;
        if self.retry_count > self.max_retries {
            self.state = SubscriptionState::Closed;
            FailureVerdict::Exhausted
        } else {
            self.state = SubscriptionState::Erroring;
            FailureVerdict::Retry {
                attempt: self.retry_count,
            }
        }
    }

    pub fn close(&mut self) {
        self.state = SubscriptionState::Closed;
    }
}
