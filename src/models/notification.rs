use std::{
    collections::HashMap,
    fmt::{Display, Formatter, Result},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::delivery::{ChannelDelivery, DeliveryStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationChannel {
    Push,
    Email,
    InApp,
    Sms,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Push => "Push",
            NotificationChannel::Email => "Email",
            NotificationChannel::InApp => "InApp",
            NotificationChannel::Sms => "Sms",
        }
    }
}

impl Display for NotificationChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NotificationType {
    #[default]
    Info,
    Success,
    Warning,
    Error,
    SecurityAlert,
    OrderUpdate,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub priority: NotificationPriority,
    pub channels: Vec<ChannelDelivery>,

    #[serde(default)]
    pub data: HashMap<String, String>,

    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        channels: impl IntoIterator<Item = ChannelDelivery>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            title: title.into(),
            message: message.into(),
            notification_type: NotificationType::default(),
            priority: NotificationPriority::default(),
            channels: channels.into_iter().collect(),
            data: HashMap::new(),
            scheduled_at: None,
            expires_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_type(mut self, notification_type: NotificationType) -> Self {
        self.notification_type = notification_type;
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_some_and(|scheduled_at| scheduled_at > now)
    }

    pub fn delivery(&self, channel: NotificationChannel) -> Option<&ChannelDelivery> {
        self.channels.iter().find(|d| d.channel == channel)
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|d| d.channel.as_str()).collect()
    }

    pub fn is_fully_delivered(&self) -> bool {
        !self.channels.is_empty()
            && self
                .channels
                .iter()
                .all(|d| d.status() == DeliveryStatus::Sent)
    }

    pub fn is_partially_delivered(&self) -> bool {
        let sent = self
            .channels
            .iter()
            .filter(|d| d.status() == DeliveryStatus::Sent)
            .count();

        sent > 0 && sent < self.channels.len()
    }

    pub fn is_completely_failed(&self) -> bool {
        !self.channels.is_empty() && self.channels.iter().all(|d| d.is_exhausted())
    }
}
