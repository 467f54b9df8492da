use std::{collections::HashMap, sync::Arc};

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    clients::publisher::Publisher,
    dispatcher::ChannelSender,
    models::{
        message::MessageMetadata,
        notification::{Notification, NotificationChannel, NotificationPriority, NotificationType},
        result::NotificationResult,
    },
    topics,
};

/// What connected clients receive for an in-app notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InAppNotification {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub created_at: DateTime<Utc>,
    pub data: HashMap<String, String>,
}

impl From<&Notification> for InAppNotification {
    fn from(notification: &Notification) -> Self {
        Self {
            id: notification.id,
            user_id: notification.user_id.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            notification_type: notification.notification_type,
            priority: notification.priority,
            created_at: notification.created_at,
            data: notification.data.clone(),
        }
    }
}

/// In-app channel: relays the notification back onto the hub, where the
/// realtime gateway fans it out to the user's sessions.
pub struct InAppSender {
    publisher: Arc<Publisher>,
    source_service: String,
    cancel: CancellationToken,
}

impl InAppSender {
    pub fn new(
        publisher: Arc<Publisher>,
        source_service: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            publisher,
            source_service: source_service.into(),
            cancel,
        }
    }
}

#[async_trait]
impl ChannelSender for InAppSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::InApp
    }

    async fn validate(&self, notification: &Notification) -> bool {
        if notification.user_id.trim().is_empty() {
            warn!(notification_id = %notification.id, "In-app notification has no user id");
            return false;
        }
        true
    }

    async fn send(&self, notification: &Notification) -> Result<NotificationResult, Error> {
        let payload = InAppNotification::from(notification);
        let metadata = MessageMetadata::new(&self.source_service)
            .with_correlation_id(notification.id.to_string())
            .with_header("user_id", &notification.user_id);

        let message_id = self
            .publisher
            .publish(&payload, topics::INAPP_DELIVERED, Some(metadata), &self.cancel)
            .await?;

        debug!(notification_id = %notification.id, %message_id, "In-app notification relayed");

        Ok(NotificationResult::success(notification.id)
            .with_metadata("topic", topics::INAPP_DELIVERED)
            .with_metadata("user_id", notification.user_id.clone())
            .with_metadata("message_id", message_id.to_string()))
    }
}
