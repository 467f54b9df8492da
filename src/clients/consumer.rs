use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        registry::{ErasedHandler, HandlerOutcome, Subscription, SubscriptionRegistry},
        transport::Transport,
    },
    error::MessagingError,
    models::message::{MessageMetadata, WireEnvelope},
    utils::short_type_name,
};

/// Routes inbound messages to typed handlers.
///
/// A single loop drains the transport's bounded inbound queue, so messages
/// are handled one at a time in arrival order. Delivery is at-least-once:
/// handlers that need exactly-once effects must deduplicate themselves.
pub struct Consumer {
    transport: Arc<Transport>,
    registry: Arc<SubscriptionRegistry>,
    dispatch_task: JoinHandle<()>,
}

impl Consumer {
    pub fn new(transport: Arc<Transport>) -> Result<Self, MessagingError> {
        let inbound = transport
            .take_inbound()
            .ok_or(MessagingError::InboundClaimed)?;
        let registry = transport.registry();

        let dispatch_task = tokio::spawn(run_dispatch_loop(Arc::clone(&registry), inbound));

        Ok(Self {
            transport,
            registry,
            dispatch_task,
        })
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn topics(&self) -> Vec<String> {
        self.registry.topics()
    }

    /// Registers `handler` for `topic` and makes sure the hub routes the topic
    /// here. Subscribing twice is safe: the hub-side subscription is
    /// idempotent, and each registered handler runs once per message.
    /// Nothing stays registered when the call fails, so retrying is safe.
    ///
    /// A handler returns `Ok(true)` when the message was processed. `Ok(false)`,
    /// an error or a panic is logged and affects nothing else.
    pub async fn subscribe<T, F, Fut>(
        &self,
        topic: &str,
        handler: F,
        cancel: &CancellationToken,
    ) -> Result<(), MessagingError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T, MessageMetadata) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let message_type = short_type_name::<T>();
        let subscription_error = |e: MessagingError| match e {
            e if e.is_cancelled() => e,
            other => {
                error!(topic, error = %other, "Failed to subscribe to topic");
                MessagingError::Subscription {
                    topic: topic.to_string(),
                    reason: other.to_string(),
                }
            }
        };

        self.transport
            .ensure_connected(cancel)
            .await
            .map_err(subscription_error)?;

        let subscription = Arc::new(Subscription::new(
            topic,
            message_type,
            erase_handler(handler),
        ));
        let first = self.registry.add(Arc::clone(&subscription));

        if let Err(e) = self.transport.subscribe_topic(topic, cancel).await {
            self.registry.remove(&subscription);
            return Err(subscription_error(e));
        }

        info!(topic, message_type, first_for_topic = first, "Subscribed to topic");
        Ok(())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.dispatch_task.abort();
    }
}

fn erase_handler<T, F, Fut>(handler: F) -> ErasedHandler
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T, MessageMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    let handler = Arc::new(handler);

    Arc::new(move |envelope: Arc<WireEnvelope>| {
        let message = match serde_json::from_str::<T>(&envelope.payload_json) {
            Ok(message) => message,
            Err(e) => {
                let reason = MessagingError::Deserialization {
                    topic: envelope.topic.clone(),
                    source: e,
                }
                .to_string();
                return async move { HandlerOutcome::Skipped(reason) }.boxed();
            }
        };

        let handler = Arc::clone(&handler);
        let metadata = envelope.metadata.clone();

        async move {
            let run = async move { handler(message, metadata).await };

            match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(true)) => HandlerOutcome::Handled,
                Ok(Ok(false)) => HandlerOutcome::Declined,
                Ok(Err(e)) => HandlerOutcome::Failed(e.to_string()),
                Err(_) => HandlerOutcome::Failed("handler panicked".to_string()),
            }
        }
        .boxed()
    })
}

async fn run_dispatch_loop(
    registry: Arc<SubscriptionRegistry>,
    mut inbound: mpsc::Receiver<WireEnvelope>,
) {
    while let Some(envelope) = inbound.recv().await {
        dispatch(&registry, envelope).await;
    }

    debug!("Inbound queue closed, dispatch loop exiting");
}

/// Runs every handler registered for the envelope's topic, in order.
pub async fn dispatch(registry: &SubscriptionRegistry, envelope: WireEnvelope) -> Vec<HandlerOutcome> {
    let handlers = registry.handlers_for(&envelope.topic);

    debug!(
        topic = %envelope.topic,
        message_type = %envelope.message_type,
        correlation_id = %envelope.metadata.correlation_id,
        handlers = handlers.len(),
        "Received message"
    );

    if handlers.is_empty() {
        warn!(topic = %envelope.topic, "No handlers for topic");
        return Vec::new();
    }

    let envelope = Arc::new(envelope);
    let mut outcomes = Vec::with_capacity(handlers.len());

    for subscription in handlers {
        let outcome = subscription.invoke(Arc::clone(&envelope)).await;

        match &outcome {
            HandlerOutcome::Handled => {
                debug!(topic = %envelope.topic, "Handler executed successfully");
            }
            HandlerOutcome::Declined => {
                warn!(
                    topic = %envelope.topic,
                    message_type = subscription.message_type,
                    "Handler returned false"
                );
            }
            HandlerOutcome::Skipped(reason) => {
                warn!(
                    topic = %envelope.topic,
                    message_type = subscription.message_type,
                    reason = %reason,
                    "Skipping message that does not decode"
                );
            }
            HandlerOutcome::Failed(reason) => {
                let failure = MessagingError::HandlerExecution {
                    topic: envelope.topic.clone(),
                    reason: reason.clone(),
                };
                error!(
                    message_type = subscription.message_type,
                    correlation_id = %envelope.metadata.correlation_id,
                    error = %failure,
                    "Handler failed"
                );
            }
        }

        outcomes.push(outcome);
    }

    outcomes
}
