use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    clients::hub::{Hub, HubLink},
    error::MessagingError,
    models::message::WireEnvelope,
    topics,
};

struct LinkEntry {
    id: u64,
    topics: HashSet<String>,
    queue: mpsc::UnboundedSender<WireEnvelope>,
    closed: CancellationToken,
}

#[derive(Default)]
struct HubState {
    links: Vec<LinkEntry>,
    registrations: Vec<String>,
    refuse_connects: u32,
    published: u64,
}

#[derive(Default)]
struct HubInner {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl HubInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A hub that lives inside the process.
///
/// Topic patterns may use `*` for one segment. A message reaches each link at
/// most once even when several of its patterns match. Each link has its own
/// hub-side queue, so publishing never waits on a subscriber. Tests use
/// [`InMemoryHub::disconnect_all`] and [`InMemoryHub::refuse_next_connects`]
/// to simulate partitions.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    inner: Arc<HubInner>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every live link; their subscriptions go with them.
    pub fn disconnect_all(&self) {
        let links = std::mem::take(&mut self.inner.lock().links);

        for link in &links {
            link.closed.cancel();
        }

        debug!(links = links.len(), "In-memory hub dropped all links");
    }

    /// The next `count` calls to `open` fail.
    pub fn refuse_next_connects(&self, count: u32) {
        self.inner.lock().refuse_connects = count;
    }

    /// Service names in the order they registered, repeats included.
    pub fn registrations(&self) -> Vec<String> {
        self.inner.lock().registrations.clone()
    }

    /// Live links listening on exactly `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .links
            .iter()
            .filter(|link| link.topics.contains(topic))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().links.len()
    }

    pub fn published_count(&self) -> u64 {
        self.inner.lock().published
    }

    fn remove_link(&self, id: u64) {
        let mut state = self.inner.lock();
        if let Some(position) = state.links.iter().position(|link| link.id == id) {
            let link = state.links.remove(position);
            link.closed.cancel();
        }
    }
}

#[async_trait]
impl Hub for InMemoryHub {
    fn describe(&self) -> String {
        "in-memory".to_string()
    }

    async fn open(
        &self,
        inbound: mpsc::Sender<WireEnvelope>,
    ) -> Result<Arc<dyn HubLink>, MessagingError> {
        let mut state = self.inner.lock();

        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(MessagingError::transport("in-memory hub refused connection"));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let closed = CancellationToken::new();
        let (queue, pending) = mpsc::unbounded_channel();

        state.links.push(LinkEntry {
            id,
            topics: HashSet::new(),
            queue,
            closed: closed.clone(),
        });

        tokio::spawn(forward_to_inbound(
            self.clone(),
            id,
            pending,
            inbound,
            closed.clone(),
        ));

        Ok(Arc::new(InMemoryLink {
            id,
            hub: self.clone(),
            closed,
        }))
    }
}

pub struct InMemoryLink {
    id: u64,
    hub: InMemoryHub,
    closed: CancellationToken,
}

impl InMemoryLink {
    fn ensure_open(&self) -> Result<(), MessagingError> {
        if self.closed.is_cancelled() {
            Err(MessagingError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HubLink for InMemoryLink {
    async fn register_service(&self, service_name: &str) -> Result<(), MessagingError> {
        self.ensure_open()?;

        let mut state = self.hub.inner.lock();
        if !state.links.iter().any(|link| link.id == self.id) {
            return Err(MessagingError::NotConnected);
        }
        state.registrations.push(service_name.to_string());

        Ok(())
    }

    async fn subscribe_to_topic(&self, topic: &str) -> Result<(), MessagingError> {
        self.ensure_open()?;

        let mut state = self.hub.inner.lock();
        let link = state
            .links
            .iter_mut()
            .find(|link| link.id == self.id)
            .ok_or(MessagingError::NotConnected)?;
        link.topics.insert(topic.to_string());

        Ok(())
    }

    async fn publish_message(&self, envelope: &WireEnvelope) -> Result<(), MessagingError> {
        self.ensure_open()?;

        let gone: Vec<u64> = {
            let mut state = self.hub.inner.lock();
            state.published += 1;

            state
                .links
                .iter()
                .filter(|link| {
                    link.topics
                        .iter()
                        .any(|pattern| topics::matches(pattern, &envelope.topic))
                })
                .filter(|link| link.queue.send(envelope.clone()).is_err())
                .map(|link| link.id)
                .collect()
        };

        for id in gone {
            warn!(link = id, topic = %envelope.topic, "Link queue gone, dropping link");
            self.hub.remove_link(id);
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }

    async fn close(&self) {
        self.hub.remove_link(self.id);
    }
}

/// Moves a link's queued messages into its transport's inbound queue. A full
/// inbound queue holds this task back, never the publisher.
async fn forward_to_inbound(
    hub: InMemoryHub,
    id: u64,
    mut pending: mpsc::UnboundedReceiver<WireEnvelope>,
    inbound: mpsc::Sender<WireEnvelope>,
    closed: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = closed.cancelled() => break,
            envelope = pending.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let sent = tokio::select! {
            _ = closed.cancelled() => break,
            sent = inbound.send(envelope) => sent,
        };

        if sent.is_err() {
            warn!(link = id, "Inbound queue gone, dropping link");
            hub.remove_link(id);
            break;
        }
    }

    debug!(link = id, "In-memory link forwarder stopped");
}
