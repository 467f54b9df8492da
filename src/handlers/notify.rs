use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::consumer::Consumer,
    dispatcher::Dispatcher,
    error::MessagingError,
    models::{
        commands::SendNotificationCommand,
        delivery::ChannelDelivery,
        message::MessageMetadata,
        notification::{Notification, NotificationChannel},
        validation::{is_email, mask_contact},
    },
    topics,
};

pub const EMAIL_KEY: &str = "email";
pub const CORRELATION_KEY: &str = "correlation_id";

/// Executes `notify.command.send`: builds a notification from the command and
/// runs one dispatch cycle for it.
pub struct NotificationCommandHandler {
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl NotificationCommandHandler {
    /// Channel entries get their retry bound from the dispatcher's
    /// [`RetryConfig`](crate::models::retry::RetryConfig).
    pub fn new(dispatcher: Arc<Dispatcher>, cancel: CancellationToken) -> Self {
        Self { dispatcher, cancel }
    }

    pub async fn register(self: Arc<Self>, consumer: &Consumer) -> Result<(), MessagingError> {
        let handler = Arc::clone(&self);

        consumer
            .subscribe(
                topics::NOTIFY_SEND,
                move |command: SendNotificationCommand, metadata| {
                    let handler = Arc::clone(&handler);
                    async move { handler.handle(command, metadata).await }
                },
                &self.cancel,
            )
            .await?;

        info!(topic = topics::NOTIFY_SEND, "Notification command handler started");
        Ok(())
    }

    pub async fn handle(
        &self,
        command: SendNotificationCommand,
        metadata: MessageMetadata,
    ) -> Result<bool, Error> {
        info!(
            user_id = %command.user_id,
            correlation_id = %metadata.correlation_id,
            channels = ?command.channels,
            "Received notification command"
        );

        let Some(mut notification) = self.build_notification(command, &metadata) else {
            return Ok(false);
        };

        let result = self.dispatcher.send(&mut notification, &self.cancel).await?;

        if result.success {
            info!(
                notification_id = %result.notification_id,
                delivered = result.delivered_channels.len(),
                total = notification.channels.len(),
                "Notification sent"
            );
            Ok(true)
        } else {
            error!(
                notification_id = %result.notification_id,
                error = result.error_message.as_deref().unwrap_or("unknown"),
                pending_retries = result.pending_retries,
                "Notification failed"
            );
            Ok(false)
        }
    }

    /// `None` when the command asks for email but names no address.
    pub fn build_notification(
        &self,
        command: SendNotificationCommand,
        metadata: &MessageMetadata,
    ) -> Option<Notification> {
        let mut data = stringify(command.data);

        if command.channels.contains(&NotificationChannel::Email) {
            let recipient = if is_email(&command.user_id) {
                Some(command.user_id.clone())
            } else {
                data.get(EMAIL_KEY).filter(|email| is_email(email)).cloned()
            };

            match recipient {
                Some(email) => {
                    debug!(email = %mask_contact(&email), "Email recipient resolved");
                    data.insert(EMAIL_KEY.to_string(), email);
                }
                None => {
                    warn!(user_id = %command.user_id, "No email found for user");
                    return None;
                }
            }
        }

        data.insert(CORRELATION_KEY.to_string(), metadata.correlation_id.clone());

        let max_retries = self.dispatcher.retry_config().max_retries;
        let channels = command
            .channels
            .iter()
            .map(|channel| ChannelDelivery::new(*channel).with_max_retries(max_retries));

        let mut notification = Notification::new(command.user_id, command.title, command.message, channels)
            .with_type(command.notification_type)
            .with_priority(command.priority);
        notification.data = data;
        notification.scheduled_at = command.scheduled_at;
        notification.expires_at = command.expires_at;

        Some(notification)
    }
}

fn stringify(data: HashMap<String, JsonValue>) -> HashMap<String, String> {
    data.into_iter()
        .map(|(key, value)| {
            let value = match value {
                JsonValue::String(s) => s,
                JsonValue::Null => String::new(),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::retry::RetryConfig;

    fn handler() -> NotificationCommandHandler {
        NotificationCommandHandler::new(
            Arc::new(Dispatcher::new(RetryConfig::default())),
            CancellationToken::new(),
        )
    }

    fn command(user_id: &str, channels: Vec<NotificationChannel>) -> SendNotificationCommand {
        SendNotificationCommand {
            user_id: user_id.to_string(),
            title: "Title".to_string(),
            message: "Body".to_string(),
            notification_type: Default::default(),
            priority: Default::default(),
            channels,
            data: HashMap::from([
                ("attempts".to_string(), json!(2)),
                ("provider".to_string(), json!("Nafath")),
            ]),
            scheduled_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_email_taken_from_user_id() {
        let metadata = MessageMetadata::new("test");
        let notification = handler()
            .build_notification(command("jane@example.com", vec![NotificationChannel::Email]), &metadata)
            .unwrap();

        assert_eq!(notification.data[EMAIL_KEY], "jane@example.com");
        assert_eq!(notification.data["attempts"], "2");
        assert_eq!(notification.data["provider"], "Nafath");
        assert_eq!(notification.data[CORRELATION_KEY], metadata.correlation_id);
        assert_eq!(notification.channels[0].max_retries, 3);
    }

    #[test]
    fn test_email_channel_without_address_is_rejected() {
        let metadata = MessageMetadata::new("test");

        assert!(
            handler()
                .build_notification(command("u1", vec![NotificationChannel::Email]), &metadata)
                .is_none()
        );
        assert!(
            handler()
                .build_notification(command("u1", vec![NotificationChannel::InApp]), &metadata)
                .is_some()
        );
    }

    #[test]
    fn test_retry_bound_follows_dispatcher_config() {
        let handler = NotificationCommandHandler::new(
            Arc::new(Dispatcher::new(RetryConfig {
                max_retries: 5,
                ..RetryConfig::default()
            })),
            CancellationToken::new(),
        );

        let notification = handler
            .build_notification(
                command("u1", vec![NotificationChannel::InApp, NotificationChannel::Push]),
                &MessageMetadata::new("test"),
            )
            .unwrap();

        assert!(notification.channels.iter().all(|entry| entry.max_retries == 5));
    }
}
