use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub correlation_id: String,
    pub source_service: String,
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl MessageMetadata {
    pub fn new(source_service: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            source_service: source_service.into(),
            timestamp: Utc::now(),
            headers: HashMap::new(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// What travels between a link and the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub message_id: Uuid,
    pub topic: String,
    pub message_type: String,
    pub payload_json: String,
    pub metadata: MessageMetadata,
}

impl WireEnvelope {
    pub fn new(
        topic: impl Into<String>,
        message_type: impl Into<String>,
        payload_json: String,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            topic: topic.into(),
            message_type: message_type.into(),
            payload_json,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_name: String,
    pub registered_at: DateTime<Utc>,
}
