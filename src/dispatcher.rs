use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::MessagingError,
    models::{
        delivery::{ChannelDelivery, DeliveryStatus, FailureKind},
        notification::{Notification, NotificationChannel},
        result::{DispatchStatus, NotificationResult},
        retry::RetryConfig,
    },
};

/// Delivers a notification over one channel.
///
/// `send` reports an unsuccessful result or an error for failures worth
/// retrying. Retries are the dispatcher's business, never the sender's.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> NotificationChannel;

    /// False when the notification cannot go out on this channel at all,
    /// e.g. no destination address.
    async fn validate(&self, notification: &Notification) -> bool;

    async fn send(&self, notification: &Notification) -> anyhow::Result<NotificationResult>;
}

enum Attempt {
    Sent(HashMap<String, JsonValue>),
    Failed(String, FailureKind),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelOutcome {
    Finished,
    CutOff,
}

struct InFlight<'a> {
    ids: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct Dispatcher {
    senders: HashMap<NotificationChannel, Arc<dyn ChannelSender>>,
    retry_config: RetryConfig,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl Dispatcher {
    pub fn new(retry_config: RetryConfig) -> Self {
        Self {
            senders: HashMap::new(),
            retry_config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Registers `sender` for its channel, replacing any earlier one.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.channel(), sender);
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    pub fn channels(&self) -> Vec<NotificationChannel> {
        let mut channels: Vec<_> = self.senders.keys().copied().collect();
        channels.sort_by_key(|channel| channel.as_str());
        channels
    }

    /// Runs one dispatch cycle over the notification's due channels.
    ///
    /// Channel failures end up on the entries and in the result. The only
    /// error is cancellation that cut an attempt short, and entries already
    /// updated stay updated.
    pub async fn send(
        &self,
        notification: &mut Notification,
        cancel: &CancellationToken,
    ) -> Result<NotificationResult, MessagingError> {
        let Some(_in_flight) = self.claim(notification.id) else {
            warn!(notification_id = %notification.id, "Notification already being dispatched");
            return Ok(
                NotificationResult::failure(notification.id, "Notification is already being sent")
                    .with_status(DispatchStatus::InFlight),
            );
        };

        let now = Utc::now();

        if notification.is_expired(now) {
            info!(notification_id = %notification.id, "Notification expired, skipping");
            return Ok(
                NotificationResult::failure(notification.id, "Notification has expired")
                    .with_status(DispatchStatus::Expired),
            );
        }

        if notification.is_scheduled(now) {
            debug!(
                notification_id = %notification.id,
                scheduled_at = ?notification.scheduled_at,
                "Notification scheduled for later"
            );
            let mut result = NotificationResult::success(notification.id)
                .with_status(DispatchStatus::Scheduled);
            if let Some(at) = notification.scheduled_at {
                result = result.with_metadata("scheduled_at", at.to_rfc3339());
            }
            return Ok(result);
        }

        let snapshot = notification.clone();
        let attempts = notification
            .channels
            .iter_mut()
            .filter(|entry| entry.is_due(now))
            .map(|entry| self.dispatch_channel(entry, &snapshot, cancel));

        let outcomes = join_all(attempts).await;
        let attempted = outcomes.len();

        if outcomes.contains(&ChannelOutcome::CutOff) {
            warn!(notification_id = %notification.id, "Dispatch cancelled");
            return Err(MessagingError::Cancelled);
        }

        let result = build_result(notification);

        info!(
            notification_id = %notification.id,
            attempted,
            delivered = ?result.delivered_channels,
            failed = ?result.failed_channels,
            pending_retries = result.pending_retries,
            "Dispatch cycle finished"
        );

        Ok(result)
    }

    /// Dispatches several notifications concurrently, one result each, in
    /// input order.
    pub async fn send_batch(
        &self,
        notifications: &mut [Notification],
        cancel: &CancellationToken,
    ) -> Vec<Result<NotificationResult, MessagingError>> {
        join_all(
            notifications
                .iter_mut()
                .map(|notification| self.send(notification, cancel)),
        )
        .await
    }

    fn claim(&self, id: Uuid) -> Option<InFlight<'_>> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);

        inserted.then_some(InFlight {
            ids: &self.in_flight,
            id,
        })
    }

    async fn dispatch_channel(
        &self,
        entry: &mut ChannelDelivery,
        notification: &Notification,
        cancel: &CancellationToken,
    ) -> ChannelOutcome {
        let channel = entry.channel;

        if entry.status() == DeliveryStatus::Failed {
            entry.reopen(Utc::now());
        }

        if let Err(e) = entry.mark_as_sending() {
            warn!(notification_id = %notification.id, %channel, error = %e, "Channel not sendable");
            return ChannelOutcome::Finished;
        }

        debug!(
            notification_id = %notification.id,
            %channel,
            attempt = entry.attempt_number(),
            "Sending on channel"
        );

        let attempt = match self.senders.get(&channel) {
            None => Attempt::Failed(
                format!("No sender registered for channel {}", channel),
                FailureKind::Permanent,
            ),
            Some(sender) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Attempt::Cancelled,
                    attempt = attempt_send(sender.as_ref(), notification) => attempt,
                }
            }
        };

        let now = Utc::now();
        let outcome = match attempt {
            Attempt::Cancelled => ChannelOutcome::CutOff,
            _ => ChannelOutcome::Finished,
        };
        let recorded = match attempt {
            Attempt::Sent(metadata) => entry.record_success(metadata, now),
            Attempt::Cancelled => entry.record_failure(
                "Operation was cancelled",
                FailureKind::Transient,
                &self.retry_config,
                now,
            ),
            Attempt::Failed(error, kind) => {
                warn!(
                    notification_id = %notification.id,
                    %channel,
                    retry_count = entry.retry_count() + 1,
                    ?kind,
                    error = %error,
                    "Channel delivery failed"
                );
                entry.record_failure(error, kind, &self.retry_config, now)
            }
        };

        if let Err(e) = recorded {
            warn!(notification_id = %notification.id, %channel, error = %e, "Failed to record attempt");
        }

        outcome
    }
}

async fn attempt_send(sender: &dyn ChannelSender, notification: &Notification) -> Attempt {
    if !sender.validate(notification).await {
        return Attempt::Failed(
            format!("Validation failed for channel {}", sender.channel()),
            FailureKind::Permanent,
        );
    }

    match sender.send(notification).await {
        Ok(result) if result.success => Attempt::Sent(result.metadata),
        Ok(result) => Attempt::Failed(
            result
                .error_message
                .unwrap_or_else(|| format!("Channel {} reported failure", sender.channel())),
            FailureKind::Transient,
        ),
        Err(e) => Attempt::Failed(e.to_string(), FailureKind::Transient),
    }
}

fn build_result(notification: &Notification) -> NotificationResult {
    let delivered: Vec<String> = notification
        .channels
        .iter()
        .filter(|entry| entry.status() == DeliveryStatus::Sent)
        .map(|entry| entry.channel.to_string())
        .collect();

    let failed: Vec<String> = notification
        .channels
        .iter()
        .filter(|entry| entry.is_exhausted())
        .map(|entry| entry.channel.to_string())
        .collect();

    let pending_retries = notification
        .channels
        .iter()
        .filter(|entry| entry.can_retry() || entry.status() == DeliveryStatus::Pending)
        .count();

    let mut result = if delivered.is_empty() {
        let reason = notification
            .channels
            .iter()
            .filter_map(|entry| entry.last_error())
            .next()
            .unwrap_or("No channel delivered the notification");
        NotificationResult::failure(notification.id, reason)
    } else {
        NotificationResult::success(notification.id)
    };

    result = result
        .with_metadata("total_channels", notification.channels.len())
        .with_metadata("successful_channels", delivered.len())
        .with_metadata("failed_channels", failed.len())
        .with_metadata("pending_retries", pending_retries)
        .with_metadata("is_fully_delivered", notification.is_fully_delivered())
        .with_metadata("is_partially_delivered", notification.is_partially_delivered())
        .with_metadata("is_completely_failed", notification.is_completely_failed());

    result.delivered_channels = delivered;
    result.failed_channels = failed;
    result.pending_retries = pending_retries;
    result
}
