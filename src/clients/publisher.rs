use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    clients::transport::Transport,
    error::MessagingError,
    models::message::{MessageMetadata, WireEnvelope},
    utils::short_type_name,
};

pub struct Publisher {
    transport: Arc<Transport>,
}

impl Publisher {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Serializes `message` and hands it to the hub. Returns the id of the
    /// envelope that was sent.
    ///
    /// Without `metadata` a fresh correlation id is minted and this service is
    /// recorded as the source.
    pub async fn publish<T: Serialize>(
        &self,
        message: &T,
        topic: &str,
        metadata: Option<MessageMetadata>,
        cancel: &CancellationToken,
    ) -> Result<Uuid, MessagingError> {
        let envelope = self.envelope(message, topic, metadata)?;

        debug!(
            topic,
            message_type = %envelope.message_type,
            correlation_id = %envelope.metadata.correlation_id,
            "Publishing message"
        );

        self.transport
            .publish(&envelope, cancel)
            .await
            .map_err(|e| match e {
                e if e.is_cancelled() => e,
                other => {
                    error!(topic, error = %other, "Failed to publish message");
                    MessagingError::Publish {
                        topic: topic.to_string(),
                        reason: other.to_string(),
                    }
                }
            })?;

        info!(
            topic,
            message_id = %envelope.message_id,
            correlation_id = %envelope.metadata.correlation_id,
            "Message published"
        );

        Ok(envelope.message_id)
    }

    /// Publishes each message in order and stops at the first failure.
    pub async fn publish_batch<T: Serialize>(
        &self,
        messages: &[T],
        topic: &str,
        metadata: Option<MessageMetadata>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Uuid>, MessagingError> {
        let mut ids = Vec::with_capacity(messages.len());

        for message in messages {
            let id = self
                .publish(message, topic, metadata.clone(), cancel)
                .await?;
            ids.push(id);
        }

        debug!(topic, count = ids.len(), "Batch published");
        Ok(ids)
    }

    fn envelope<T: Serialize>(
        &self,
        message: &T,
        topic: &str,
        metadata: Option<MessageMetadata>,
    ) -> Result<WireEnvelope, MessagingError> {
        let payload_json = serde_json::to_string(message)?;

        let mut metadata =
            metadata.unwrap_or_else(|| MessageMetadata::new(self.transport.service_name()));
        if metadata.source_service.is_empty() {
            metadata.source_service = self.transport.service_name().to_string();
        }

        Ok(WireEnvelope::new(
            topic,
            short_type_name::<T>(),
            payload_json,
            metadata,
        ))
    }
}
