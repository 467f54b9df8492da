use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use notify_relay::{
    clients::{
        memory::InMemoryHub,
        transport::{Transport, TransportConfig},
    },
    dispatcher::ChannelSender,
    models::{
        notification::{Notification, NotificationChannel},
        result::NotificationResult,
        retry::RetryConfig,
    },
};
use tokio::time::{Instant, sleep};

pub fn test_transport(hub: &InMemoryHub, service_name: &str) -> Arc<Transport> {
    test_transport_with_capacity(hub, service_name, 64)
}

pub fn test_transport_with_capacity(
    hub: &InMemoryHub,
    service_name: &str,
    inbound_capacity: usize,
) -> Arc<Transport> {
    Transport::new(
        Arc::new(hub.clone()),
        TransportConfig {
            service_name: service_name.to_string(),
            reconnect_delays: vec![Duration::ZERO, Duration::from_millis(20)],
            max_reconnect_attempts: None,
            inbound_capacity,
        },
    )
}

pub fn instant_retries() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_delay_ms: 0,
        max_delay_ms: 0,
        backoff_multiplier: 2,
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !check() {
        if Instant::now() > deadline {
            return Err(anyhow!("timed out waiting for {}", what));
        }
        sleep(Duration::from_millis(10)).await;
    }

    Ok(())
}

/// Channel sender with scripted behaviour that records what it was given.
pub struct RecordingSender {
    channel: NotificationChannel,
    valid: bool,
    fail_first: u32,
    delay: Duration,
    pub calls: Arc<AtomicU32>,
    pub sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSender {
    pub fn new(channel: NotificationChannel) -> Self {
        Self {
            channel,
            valid: true,
            fail_first: 0,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicU32::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(channel: NotificationChannel) -> Self {
        Self::new(channel).failing_first(u32::MAX)
    }

    pub fn failing_first(mut self, count: u32) -> Self {
        self.fail_first = count;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelSender for RecordingSender {
    fn channel(&self) -> NotificationChannel {
        self.channel
    }

    async fn validate(&self, _notification: &Notification) -> bool {
        self.valid
    }

    async fn send(&self, notification: &Notification) -> Result<NotificationResult> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if attempt < self.fail_first {
            return Ok(NotificationResult::failure(
                notification.id,
                format!("provider unavailable (attempt {})", attempt + 1),
            ));
        }

        self.sent
            .lock()
            .map_err(|_| anyhow!("recording lock poisoned"))?
            .push(notification.clone());

        Ok(NotificationResult::success(notification.id).with_metadata("attempt", attempt + 1))
    }
}
