use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result};
use serde_json::{Value as JsonValue, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    clients::{consumer::Consumer, publisher::Publisher},
    error::MessagingError,
    models::{
        commands::{
            SendNotificationCommand, TwoFactorExpiredEvent, TwoFactorFailedEvent,
            TwoFactorInitiatedEvent, TwoFactorSucceededEvent,
        },
        message::MessageMetadata,
        notification::{NotificationChannel, NotificationPriority, NotificationType},
    },
    topics,
};

const SOURCE_SERVICE: &str = "auth";

/// Turns two-factor authentication events into `notify.command.send`
/// commands for the user who authenticated.
pub struct AuthenticationHandler {
    publisher: Arc<Publisher>,
    channels: Vec<NotificationChannel>,
    cancel: CancellationToken,
}

impl AuthenticationHandler {
    pub fn new(
        publisher: Arc<Publisher>,
        channels: Vec<NotificationChannel>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            publisher,
            channels,
            cancel,
        }
    }

    pub async fn register(self: Arc<Self>, consumer: &Consumer) -> Result<(), MessagingError> {
        info!(channels = ?self.channels, "Starting authentication notification handler");

        let handler = Arc::clone(&self);
        consumer
            .subscribe(
                topics::AUTH_TWO_FACTOR_SUCCEEDED,
                move |event: TwoFactorSucceededEvent, metadata| {
                    let handler = Arc::clone(&handler);
                    async move { handler.on_succeeded(event, metadata).await }
                },
                &self.cancel,
            )
            .await?;

        let handler = Arc::clone(&self);
        consumer
            .subscribe(
                topics::AUTH_TWO_FACTOR_FAILED,
                move |event: TwoFactorFailedEvent, metadata| {
                    let handler = Arc::clone(&handler);
                    async move { handler.on_failed(event, metadata).await }
                },
                &self.cancel,
            )
            .await?;

        let handler = Arc::clone(&self);
        consumer
            .subscribe(
                topics::AUTH_TWO_FACTOR_INITIATED,
                move |event: TwoFactorInitiatedEvent, metadata| {
                    let handler = Arc::clone(&handler);
                    async move { handler.on_initiated(event, metadata).await }
                },
                &self.cancel,
            )
            .await?;

        let handler = Arc::clone(&self);
        consumer
            .subscribe(
                topics::AUTH_TWO_FACTOR_EXPIRED,
                move |event: TwoFactorExpiredEvent, metadata| {
                    let handler = Arc::clone(&handler);
                    async move { handler.on_expired(event, metadata).await }
                },
                &self.cancel,
            )
            .await?;

        info!("Authentication notification handler started");
        Ok(())
    }

    pub async fn on_succeeded(
        &self,
        event: TwoFactorSucceededEvent,
        metadata: MessageMetadata,
    ) -> Result<bool, Error> {
        info!(identifier = %event.identifier, "Two-factor authentication succeeded");

        let command = self.command(
            &event.identifier,
            "Signed in successfully",
            format!("Your identity was verified through {}", event.provider),
            NotificationType::SecurityAlert,
            NotificationPriority::High,
            event_data("two_factor_succeeded", &event.transaction_id, &event.identifier, &event.provider),
        );

        self.forward(command, metadata).await
    }

    pub async fn on_failed(
        &self,
        event: TwoFactorFailedEvent,
        metadata: MessageMetadata,
    ) -> Result<bool, Error> {
        let reason = event
            .reason
            .clone()
            .unwrap_or_else(|| "unknown reason".to_string());
        warn!(identifier = %event.identifier, reason = %reason, "Two-factor authentication failed");

        let mut data = event_data("two_factor_failed", &event.transaction_id, &event.identifier, &event.provider);
        data.insert("reason".to_string(), json!(reason));

        let command = self.command(
            &event.identifier,
            "Identity verification failed",
            format!("Your verification attempt failed: {}", reason),
            NotificationType::SecurityAlert,
            NotificationPriority::Urgent,
            data,
        );

        self.forward(command, metadata).await
    }

    pub async fn on_initiated(
        &self,
        event: TwoFactorInitiatedEvent,
        metadata: MessageMetadata,
    ) -> Result<bool, Error> {
        info!(identifier = %event.identifier, "Two-factor authentication initiated");

        let mut data = event_data("two_factor_initiated", &event.transaction_id, &event.identifier, &event.provider);
        if let Some(expires_at) = event.expires_at {
            data.insert("expires_at".to_string(), json!(expires_at.to_rfc3339()));
        }

        let mut command = self.command(
            &event.identifier,
            "New verification request",
            format!("Identity verification started through {}", event.provider),
            NotificationType::Info,
            NotificationPriority::Normal,
            data,
        );
        command.expires_at = event.expires_at;

        self.forward(command, metadata).await
    }

    pub async fn on_expired(
        &self,
        event: TwoFactorExpiredEvent,
        metadata: MessageMetadata,
    ) -> Result<bool, Error> {
        warn!(identifier = %event.identifier, "Two-factor authentication expired");

        let command = self.command(
            &event.identifier,
            "Verification expired",
            format!("Your verification request through {} has expired", event.provider),
            NotificationType::Warning,
            NotificationPriority::Normal,
            event_data("two_factor_expired", &event.transaction_id, &event.identifier, &event.provider),
        );

        self.forward(command, metadata).await
    }

    fn command(
        &self,
        user_id: &str,
        title: &str,
        message: String,
        notification_type: NotificationType,
        priority: NotificationPriority,
        data: HashMap<String, JsonValue>,
    ) -> SendNotificationCommand {
        SendNotificationCommand {
            user_id: user_id.to_string(),
            title: title.to_string(),
            message,
            notification_type,
            priority,
            channels: self.channels.clone(),
            data,
            scheduled_at: None,
            expires_at: None,
        }
    }

    async fn forward(
        &self,
        command: SendNotificationCommand,
        metadata: MessageMetadata,
    ) -> Result<bool, Error> {
        let metadata = MessageMetadata {
            source_service: SOURCE_SERVICE.to_string(),
            ..metadata
        };

        self.publisher
            .publish(&command, topics::NOTIFY_SEND, Some(metadata), &self.cancel)
            .await?;

        Ok(true)
    }
}

fn event_data(
    event: &str,
    transaction_id: &str,
    identifier: &str,
    provider: &str,
) -> HashMap<String, JsonValue> {
    HashMap::from([
        ("event".to_string(), json!(event)),
        ("transaction_id".to_string(), json!(transaction_id)),
        ("identifier".to_string(), json!(identifier)),
        ("provider".to_string(), json!(provider)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_data_carries_event_fields() {
        let data = event_data("two_factor_succeeded", "t1", "u1", "Nafath");

        assert_eq!(data["event"], "two_factor_succeeded");
        assert_eq!(data["transaction_id"], "t1");
        assert_eq!(data["identifier"], "u1");
        assert_eq!(data["provider"], "Nafath");
    }
}
