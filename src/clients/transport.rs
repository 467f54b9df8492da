use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::{
    sync::{Mutex as AsyncMutex, RwLock, mpsc, watch},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        hub::{Hub, HubLink},
        registry::SubscriptionRegistry,
    },
    error::MessagingError,
    models::{message::WireEnvelope, status::ConnectionState},
    utils::with_cancellation,
};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub service_name: String,
    /// Waits before each reconnect attempt; the last entry repeats.
    pub reconnect_delays: Vec<Duration>,
    /// `None` keeps trying forever.
    pub max_reconnect_attempts: Option<u32>,
    pub inbound_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            service_name: "notify-relay".to_string(),
            reconnect_delays: vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
            max_reconnect_attempts: None,
            inbound_capacity: 256,
        }
    }
}

impl TransportConfig {
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.reconnect_delays.len().saturating_sub(1));
        self.reconnect_delays
            .get(index)
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

/// The process-wide connection to the hub.
///
/// Owns the connect/reconnect lifecycle. Every successful connection
/// re-registers the service and replays one subscribe call per topic in the
/// registry, so subscriptions outlive network partitions.
pub struct Transport {
    hub: Arc<dyn Hub>,
    config: TransportConfig,
    registry: Arc<SubscriptionRegistry>,
    state: watch::Sender<ConnectionState>,
    link: RwLock<Option<Arc<dyn HubLink>>>,
    connect_guard: AsyncMutex<()>,
    inbound_tx: mpsc::Sender<WireEnvelope>,
    inbound_rx: Mutex<Option<mpsc::Receiver<WireEnvelope>>>,
    shutdown: CancellationToken,
}

impl Transport {
    pub fn new(hub: Arc<dyn Hub>, config: TransportConfig) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        info!(
            hub = %hub.describe(),
            service = %config.service_name,
            "Transport initialized"
        );

        Arc::new(Self {
            hub,
            config,
            registry: Arc::new(SubscriptionRegistry::new()),
            state,
            link: RwLock::new(None),
            connect_guard: AsyncMutex::new(()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Hands the inbound queue to its single consumer. Only the first call
    /// gets it.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<WireEnvelope>> {
        self.inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Connects on demand. The attempt runs detached, so a cancelled caller
    /// never leaves a half-finished connection behind.
    pub async fn ensure_connected(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn HubLink>, MessagingError> {
        if let Some(link) = self.current_link().await {
            return Ok(link);
        }

        let transport = Arc::clone(self);
        let attempt = tokio::spawn(async move { transport.connect().await });

        with_cancellation(cancel, async move {
            attempt.await.map_err(MessagingError::transport)?
        })
        .await
    }

    /// Concurrent callers queue on the connect guard; all but the first find
    /// the link already up.
    pub async fn connect(self: &Arc<Self>) -> Result<Arc<dyn HubLink>, MessagingError> {
        let _guard = self.connect_guard.lock().await;

        if let Some(link) = self.current_link().await {
            return Ok(link);
        }

        if self.shutdown.is_cancelled() {
            return Err(MessagingError::NotConnected);
        }

        let previous = self.state();
        self.state.send_replace(ConnectionState::Connecting);

        match self.establish().await {
            Ok(link) => {
                *self.link.write().await = Some(Arc::clone(&link));
                self.state.send_replace(ConnectionState::Connected);

                info!(hub = %self.hub.describe(), "Connected to messaging hub");

                tokio::spawn(Arc::clone(self).supervise(Arc::clone(&link)));
                Ok(link)
            }
            Err(e) => {
                error!(hub = %self.hub.describe(), error = %e, "Failed to connect to messaging hub");

                let fallback = if previous == ConnectionState::Reconnecting {
                    ConnectionState::Reconnecting
                } else {
                    ConnectionState::Disconnected
                };
                self.state.send_replace(fallback);
                Err(e)
            }
        }
    }

    pub async fn subscribe_topic(
        self: &Arc<Self>,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MessagingError> {
        let link = self.ensure_connected(cancel).await?;
        with_cancellation(cancel, link.subscribe_to_topic(topic)).await
    }

    pub async fn publish(
        self: &Arc<Self>,
        envelope: &WireEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), MessagingError> {
        let link = self.ensure_connected(cancel).await?;
        with_cancellation(cancel, link.publish_message(envelope)).await
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let _guard = self.connect_guard.lock().await;
        if let Some(link) = self.link.write().await.take() {
            link.close().await;
        }
        self.state.send_replace(ConnectionState::Disconnected);

        info!(service = %self.config.service_name, "Transport shut down");
    }

    async fn current_link(&self) -> Option<Arc<dyn HubLink>> {
        if !self.state().is_connected() {
            return None;
        }

        self.link
            .read()
            .await
            .as_ref()
            .filter(|link| link.is_open())
            .cloned()
    }

    async fn establish(&self) -> Result<Arc<dyn HubLink>, MessagingError> {
        let link = self.hub.open(self.inbound_tx.clone()).await?;

        link.register_service(&self.config.service_name).await?;
        info!(service = %self.config.service_name, "Registered with messaging hub");

        for topic in self.registry.topics() {
            if let Err(e) = link.subscribe_to_topic(&topic).await {
                link.close().await;
                return Err(MessagingError::Subscription {
                    topic,
                    reason: e.to_string(),
                });
            }
            debug!(topic = %topic, "Re-subscribed to topic");
        }

        Ok(link)
    }

    async fn supervise(self: Arc<Self>, mut link: Arc<dyn HubLink>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = link.closed() => {}
            }

            {
                let _guard = self.connect_guard.lock().await;
                let mut slot = self.link.write().await;

                let still_current = slot
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &link));
                if !still_current || self.shutdown.is_cancelled() {
                    return;
                }

                *slot = None;
                self.state.send_replace(ConnectionState::Reconnecting);
            }

            warn!(hub = %self.hub.describe(), "Connection to messaging hub lost, reconnecting");

            match self.reconnect().await {
                Some(next) => link = next,
                None => return,
            }
        }
    }

    async fn reconnect(&self) -> Option<Arc<dyn HubLink>> {
        let mut attempt: u32 = 0;

        loop {
            if self
                .config
                .max_reconnect_attempts
                .is_some_and(|max| attempt >= max)
            {
                let _guard = self.connect_guard.lock().await;
                if self.state() == ConnectionState::Reconnecting {
                    self.state.send_replace(ConnectionState::Disconnected);
                }
                error!(
                    attempts = attempt,
                    "Giving up on messaging hub after exhausting reconnect attempts"
                );
                return None;
            }

            let delay = self.config.reconnect_delay(attempt);
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = sleep(delay) => {}
            }
            attempt += 1;

            let _guard = self.connect_guard.lock().await;

            // A caller connected on demand meanwhile; its supervisor owns that link.
            if self.current_link().await.is_some() || self.shutdown.is_cancelled() {
                return None;
            }

            match self.establish().await {
                Ok(link) => {
                    *self.link.write().await = Some(Arc::clone(&link));
                    self.state.send_replace(ConnectionState::Connected);
                    info!(attempt, "Reconnected to messaging hub");
                    return Some(link);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }
    }
}
