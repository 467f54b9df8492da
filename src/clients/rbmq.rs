use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::hub::{Hub, HubLink},
    config::Config,
    error::MessagingError,
    models::message::{MessageMetadata, ServiceRegistration, WireEnvelope},
    topics,
    utils::short_type_name,
};

/// RabbitMQ as the hub: one topic exchange, one exclusive queue per link.
///
/// Subscribing binds the link's queue to the exchange, so AMQP `*` patterns
/// behave like the in-process ones. The queue dies with the connection and a
/// reconnect starts from a fresh, unbound queue.
pub struct RabbitMqHub {
    url: String,
    exchange: String,
    prefetch_count: u16,
}

impl RabbitMqHub {
    pub fn new(url: impl Into<String>, exchange: impl Into<String>, prefetch_count: u16) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
            prefetch_count,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.rabbitmq_url,
            &config.hub_exchange_name,
            config.prefetch_count,
        )
    }
}

#[async_trait]
impl Hub for RabbitMqHub {
    fn describe(&self) -> String {
        format!("rabbitmq exchange '{}'", self.exchange)
    }

    async fn open(
        &self,
        inbound: mpsc::Sender<WireEnvelope>,
    ) -> Result<Arc<dyn HubLink>, MessagingError> {
        debug!("Connecting to RabbitMQ...");

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::transport(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::transport(format!("RabbitMQ channel creation failed: {}", e)))?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::transport(format!("Failed to set up QoS: {}", e)))?;

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::transport(format!("Failed to declare exchange: {}", e)))?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::transport(format!("Failed to declare link queue: {}", e)))?;
        let queue_name = queue.name().as_str().to_string();

        let consumer = channel
            .basic_consume(
                &queue_name,
                "notify_relay",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::transport(format!("Failed to create consumer: {}", e)))?;

        let closed = CancellationToken::new();

        let on_error = closed.clone();
        connection.on_error(move |e| {
            error!(error = %e, "RabbitMQ connection error");
            on_error.cancel();
        });

        let forward_task = tokio::spawn(forward_deliveries(
            consumer,
            channel.clone(),
            inbound,
            closed.clone(),
        ));

        info!(queue = %queue_name, exchange = %self.exchange, "RabbitMQ link established");

        Ok(Arc::new(RabbitMqLink {
            connection,
            channel,
            exchange: self.exchange.clone(),
            queue_name,
            bound_topics: Mutex::new(HashSet::new()),
            closed,
            forward_task,
        }))
    }
}

async fn forward_deliveries(
    mut consumer: Consumer,
    channel: Channel,
    inbound: mpsc::Sender<WireEnvelope>,
    closed: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = closed.cancelled() => break,
            next = consumer.next() => next,
        };

        let delivery = match delivery {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                error!(error = %e, "RabbitMQ consumer failed");
                break;
            }
            None => break,
        };

        let envelope: WireEnvelope = match serde_json::from_slice(&delivery.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping delivery that is not a message envelope");
                if let Err(e) = channel
                    .basic_reject(delivery.delivery_tag, BasicRejectOptions { requeue: false })
                    .await
                {
                    error!(error = %e, "Failed to reject delivery");
                }
                continue;
            }
        };

        if inbound.send(envelope).await.is_err() {
            debug!("Inbound queue closed, stopping RabbitMQ forwarder");
            break;
        }

        if let Err(e) = channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
        {
            error!(error = %e, "Failed to acknowledge delivery");
            break;
        }
    }

    closed.cancel();
}

pub struct RabbitMqLink {
    connection: Connection,
    channel: Channel,
    exchange: String,
    queue_name: String,
    bound_topics: Mutex<HashSet<String>>,
    closed: CancellationToken,
    forward_task: JoinHandle<()>,
}

impl RabbitMqLink {
    async fn publish_raw(&self, topic: &str, envelope: &WireEnvelope) -> Result<(), MessagingError> {
        let payload = serde_json::to_vec(envelope)?;

        self.channel
            .basic_publish(
                &self.exchange,
                topic,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_message_id(envelope.message_id.to_string().into())
                    .with_delivery_mode(2),
            )
            .await
            .map_err(|e| MessagingError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

#[async_trait]
impl HubLink for RabbitMqLink {
    async fn register_service(&self, service_name: &str) -> Result<(), MessagingError> {
        let registration = ServiceRegistration {
            service_name: service_name.to_string(),
            registered_at: Utc::now(),
        };

        let envelope = WireEnvelope::new(
            topics::SERVICE_REGISTERED,
            short_type_name::<ServiceRegistration>(),
            serde_json::to_string(&registration)?,
            MessageMetadata::new(service_name),
        );

        self.publish_raw(topics::SERVICE_REGISTERED, &envelope).await
    }

    async fn subscribe_to_topic(&self, topic: &str) -> Result<(), MessagingError> {
        let mut bound = self.bound_topics.lock().await;
        if bound.contains(topic) {
            return Ok(());
        }

        self.channel
            .queue_bind(
                &self.queue_name,
                &self.exchange,
                topic,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::Subscription {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        bound.insert(topic.to_string());
        debug!(topic, queue = %self.queue_name, "Queue bound to topic");

        Ok(())
    }

    async fn publish_message(&self, envelope: &WireEnvelope) -> Result<(), MessagingError> {
        self.publish_raw(&envelope.topic, envelope).await
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && self.connection.status().connected()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }

    async fn close(&self) {
        self.closed.cancel();
        self.forward_task.abort();

        if let Err(e) = self.connection.close(200, "closing").await {
            debug!(error = %e, "RabbitMQ connection already closed");
        }
    }
}
