//! Async driver for one subscription instance.

use std::sync::Arc;

use super::decode::decode_payload;
use super::machine::{DecodeVerdict, Delivery, FailureVerdict, SubscriptionMachine};
use super::registry::SubscriptionRegistry;
use super::types::{CloseReason, Payload, SubscriptionId};
use crate::classify::{classify, FailureKind};
use crate::error::{FailureCode, StoreFailure};
use crate::recovery::RecoveryOrchestrator;
use crate::retry::RetryScheduler;
use crate::store::{Channel, ChannelEvent, ChannelTarget, RemoteStore};
use crate::types::ResourceKey;
use tokio_util::sync::CancellationToken;

/// Caller-supplied delivery callback.
pub type PayloadCallback = Arc<dyn Fn(Payload) + Send + Sync>;

pub(crate) struct SubscriptionWorker {
    pub id: SubscriptionId,
    pub key: ResourceKey,
    pub token: CancellationToken,
    pub store: Arc<dyn RemoteStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub orchestrator: Arc<RecoveryOrchestrator>,
    pub retry: RetryScheduler,
    pub machine: SubscriptionMachine,
    pub callback: PayloadCallback,
}

impl SubscriptionWorker {
    /// Drive the subscription until it is cancelled or gives up.
    pub async fn run(mut self) {
        let target = ChannelTarget::for_resource(&self.key);

        while !self.token.is_cancelled() {
            self.machine.begin_attempt();
            self.sync();

            let failure = match self.store.subscribe(&target) {
                Ok(channel) => match self.pump(channel).await {
                    Some(failure) => failure,
                    None => break,
                },
                Err(failure) => failure,
            };

            if !self.handle_failure(failure).await {
                break;
            }
        }

        tracing::debug!(
            key = %self.key,
            subscription_id = self.id.0,
            "subscription worker stopped"
        );
    }

    /// Forward deliveries until the channel fails. `None` means cancelled.
    async fn pump(&mut self, channel: Channel) -> Option<StoreFailure> {
        let Channel {
            id: channel_id,
            mut events,
        } = channel;

        if !self.registry.attach_channel(self.id, &self.key, channel_id) {
            self.store.close_channel(channel_id);
            return None;
        }

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => break None,
                event = events.recv() => event,
            };

            match event {
                Some(ChannelEvent::Snapshot(docs)) => match decode_payload(self.key.kind, docs) {
                    Ok(payload) => {
                        if self.token.is_cancelled() {
                            break None;
                        }
                        if self.machine.on_delivery() == Delivery::BecameLive {
                            tracing::debug!(key = %self.key, "subscription live");
                            self.registry.record_live();
                            self.orchestrator.note_clean_delivery();
                        }
                        self.sync();
                        (self.callback)(payload);
                    }
                    Err(err) => match self.machine.on_decode_error() {
                        DecodeVerdict::Tolerated { consecutive } => {
                            tracing::warn!(
                                key = %self.key,
                                consecutive,
                                error = %err,
                                "dropping undecodable payload"
                            );
                            self.sync();
                        }
                        DecodeVerdict::Resubscribe => {
                            break Some(StoreFailure::new(
                                FailureCode::Unknown,
                                format!("malformed payload: {}", err),
                            ));
                        }
                    },
                },
                Some(ChannelEvent::Error(failure)) => break Some(failure),
                None => break Some(StoreFailure::unavailable("channel closed by store")),
            }
        };

        self.registry.detach_channel(self.id, &self.key);
        self.store.close_channel(channel_id);
        outcome
    }

    /// Classify, recover if needed, and wait out the retry delay.
    /// Returns false when the worker should stop.
    async fn handle_failure(&mut self, failure: StoreFailure) -> bool {
        let kind = classify(&failure);
        let pressure = self.registry.record_error();
        tracing::warn!(
            key = %self.key,
            kind = %kind,
            pressure,
            error = %failure,
            "subscription channel failed"
        );

        let corrupted = kind == FailureKind::InternalCorruption;
        if corrupted {
            self.orchestrator.handle_corruption(&self.key).await;
        }

        if self.token.is_cancelled() {
            return false;
        }

        match self.machine.on_failure() {
            FailureVerdict::Exhausted => {
                self.sync();
                tracing::error!(
                    key = %self.key,
                    retries = self.retry.config().max_retries,
                    "subscription retry budget exhausted"
                );
                if self
                    .registry
                    .unregister(self.id, &self.key, CloseReason::RetriesExhausted)
                {
                    (self.callback)(Payload::empty(self.key.kind));
                }
                false
            }
            FailureVerdict::Retry { attempt } => {
                self.sync();
                let mut delay = self.retry.next_delay(attempt, pressure);
                if corrupted {
                    delay += self.retry.config().corruption_extra_delay();
                }
                tracing::warn!(
                    key = %self.key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling subscription retry"
                );
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
        }
    }

    fn sync(&self) {
        self.registry.sync(self.id, &self.key, &self.machine);
    }
}
