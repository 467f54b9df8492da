use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{error::MessagingError, models::message::WireEnvelope};

/// A message hub that can open physical connections.
///
/// Every link opened by a hub pushes the messages it receives into `inbound`.
/// The sender is bounded, so a slow consumer back-pressures the link.
#[async_trait]
pub trait Hub: Send + Sync + 'static {
    fn describe(&self) -> String;

    async fn open(
        &self,
        inbound: mpsc::Sender<WireEnvelope>,
    ) -> Result<Arc<dyn HubLink>, MessagingError>;
}

/// One live connection to a hub.
#[async_trait]
pub trait HubLink: Send + Sync {
    async fn register_service(&self, service_name: &str) -> Result<(), MessagingError>;

    /// Subscribing to a topic the link already listens on is a no-op.
    async fn subscribe_to_topic(&self, topic: &str) -> Result<(), MessagingError>;

    async fn publish_message(&self, envelope: &WireEnvelope) -> Result<(), MessagingError>;

    fn is_open(&self) -> bool;

    /// Resolves once the link is gone, for whatever reason.
    async fn closed(&self);

    async fn close(&self);
}
