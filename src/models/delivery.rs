use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    error::MessagingError,
    models::{
        notification::NotificationChannel,
        retry::{DEFAULT_MAX_RETRIES, RetryConfig},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sending => write!(f, "sending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Provider error, timeout, cancellation.
    Transient,
    /// No sender for the channel, or the notification does not validate for it.
    Permanent,
}

/// Retry bookkeeping for one channel of one notification.
///
/// `Pending -> Sending -> Sent` is the happy path. A failed attempt moves to
/// `Failed`, and the entry becomes `Pending` again once `next_retry_at` has
/// passed, until `retry_count` exceeds `max_retries`. `Sent` and exhausted
/// `Failed` never change again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel: NotificationChannel,
    pub max_retries: u32,
    status: DeliveryStatus,
    retry_count: u32,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    sent_at: Option<DateTime<Utc>>,

    #[serde(default)]
    permanent_failure: bool,

    #[serde(default)]
    metadata: HashMap<String, JsonValue>,
}

impl ChannelDelivery {
    pub fn new(channel: NotificationChannel) -> Self {
        Self {
            channel,
            max_retries: DEFAULT_MAX_RETRIES,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            sent_at: None,
            permanent_failure: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn metadata(&self) -> &HashMap<String, JsonValue> {
        &self.metadata
    }

    /// Attempt number the next send would be (1-based).
    pub fn attempt_number(&self) -> u32 {
        self.retry_count + 1
    }

    pub fn can_retry(&self) -> bool {
        self.status == DeliveryStatus::Failed
            && !self.permanent_failure
            && self.retry_count <= self.max_retries
    }

    pub fn is_exhausted(&self) -> bool {
        self.status == DeliveryStatus::Failed && !self.can_retry()
    }

    pub fn is_terminal(&self) -> bool {
        self.status == DeliveryStatus::Sent || self.is_exhausted()
    }

    /// Whether a dispatch cycle running at `now` should attempt this entry.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            DeliveryStatus::Pending => true,
            DeliveryStatus::Failed => {
                self.can_retry() && self.next_retry_at.is_none_or(|at| at <= now)
            }
            DeliveryStatus::Sending | DeliveryStatus::Sent => false,
        }
    }

    /// `Failed -> Pending` once the retry window has opened.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != DeliveryStatus::Failed || !self.is_due(now) {
            return false;
        }

        self.status = DeliveryStatus::Pending;
        self.next_retry_at = None;
        true
    }

    pub fn mark_as_sending(&mut self) -> Result<(), MessagingError> {
        self.transition(DeliveryStatus::Pending, DeliveryStatus::Sending)?;
        self.status = DeliveryStatus::Sending;
        Ok(())
    }

    pub fn record_success(
        &mut self,
        metadata: HashMap<String, JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<(), MessagingError> {
        self.transition(DeliveryStatus::Sending, DeliveryStatus::Sent)?;

        self.status = DeliveryStatus::Sent;
        self.sent_at = Some(now);
        self.next_retry_at = None;
        self.last_error = None;
        self.metadata.extend(metadata);
        Ok(())
    }

    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        kind: FailureKind,
        retry_config: &RetryConfig,
        now: DateTime<Utc>,
    ) -> Result<(), MessagingError> {
        self.transition(DeliveryStatus::Sending, DeliveryStatus::Failed)?;

        self.status = DeliveryStatus::Failed;
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.permanent_failure = kind == FailureKind::Permanent;

        self.next_retry_at = if self.can_retry() {
            let delay = chrono::Duration::from_std(retry_config.delay_for(self.retry_count))
                .unwrap_or(chrono::Duration::zero());
            Some(now + delay)
        } else {
            None
        };

        Ok(())
    }

    fn transition(
        &self,
        expected: DeliveryStatus,
        to: DeliveryStatus,
    ) -> Result<(), MessagingError> {
        if self.status != expected {
            return Err(MessagingError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}
