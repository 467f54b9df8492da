use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::notification::{NotificationChannel, NotificationPriority, NotificationType};

/// Payload of `notify.command.send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotificationCommand {
    pub user_id: String,
    pub title: String,
    pub message: String,

    #[serde(default)]
    pub notification_type: NotificationType,

    #[serde(default)]
    pub priority: NotificationPriority,

    pub channels: Vec<NotificationChannel>,

    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorInitiatedEvent {
    pub identifier: String,
    pub provider: String,
    pub transaction_id: String,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorSucceededEvent {
    pub identifier: String,
    pub provider: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorFailedEvent {
    pub identifier: String,
    pub provider: String,
    pub transaction_id: String,

    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorExpiredEvent {
    pub identifier: String,
    pub provider: String,
    pub transaction_id: String,
}
