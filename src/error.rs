use thiserror::Error;

use crate::models::delivery::DeliveryStatus;

/// Errors surfaced by the messaging layer.
///
/// Channel delivery failures never show up here: they are recorded on the
/// `ChannelDelivery` entry and reported through `NotificationResult`.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("transport connection failed: {0}")]
    TransportConnection(String),

    #[error("transport is not connected")]
    NotConnected,

    #[error("subscription to '{topic}' failed: {reason}")]
    Subscription { topic: String, reason: String },

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("failed to decode message on '{topic}': {source}")]
    Deserialization {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("handler for '{topic}' failed: {reason}")]
    HandlerExecution { topic: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid delivery transition from {from} to {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("inbound queue already claimed by another consumer")]
    InboundClaimed,

    #[error("operation was cancelled")]
    Cancelled,
}

impl MessagingError {
    pub fn transport(reason: impl std::fmt::Display) -> Self {
        Self::TransportConnection(reason.to_string())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
