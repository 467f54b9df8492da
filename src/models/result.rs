use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    Expired,
    Scheduled,
    InFlight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResult {
    pub success: bool,
    pub notification_id: Uuid,
    pub status: DispatchStatus,

    #[serde(default)]
    pub delivered_channels: Vec<String>,

    #[serde(default)]
    pub failed_channels: Vec<String>,

    #[serde(default)]
    pub pending_retries: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

impl NotificationResult {
    pub fn success(notification_id: Uuid) -> Self {
        Self {
            success: true,
            notification_id,
            status: DispatchStatus::Completed,
            delivered_channels: Vec::new(),
            failed_channels: Vec::new(),
            pending_retries: 0,
            error_message: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failure(notification_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(error.into()),
            ..Self::success(notification_id)
        }
    }

    pub fn with_status(mut self, status: DispatchStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == DispatchStatus::Scheduled
    }
}
