use std::{
    collections::HashMap,
    fmt::{Display, Formatter},
    sync::{Arc, PoisonError, RwLock},
};

use futures_util::future::BoxFuture;

use crate::{models::message::WireEnvelope, topics};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Handled,
    Declined,
    Skipped(String),
    Failed(String),
}

impl Display for HandlerOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutcome::Handled => write!(f, "handled"),
            HandlerOutcome::Declined => write!(f, "declined"),
            HandlerOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            HandlerOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Decodes the payload with the type captured at subscribe time and runs the
/// user handler.
pub type ErasedHandler =
    Arc<dyn Fn(Arc<WireEnvelope>) -> BoxFuture<'static, HandlerOutcome> + Send + Sync>;

pub struct Subscription {
    pub topic: String,
    pub message_type: &'static str,
    handler: ErasedHandler,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, message_type: &'static str, handler: ErasedHandler) -> Self {
        Self {
            topic: topic.into(),
            message_type,
            handler,
        }
    }

    pub async fn invoke(&self, envelope: Arc<WireEnvelope>) -> HandlerOutcome {
        (self.handler)(envelope).await
    }
}

#[derive(Default)]
struct RegistryInner {
    order: Vec<String>,
    handlers: HashMap<String, Vec<Arc<Subscription>>>,
}

/// Topic pattern -> handlers, remembering the order topics were first seen.
///
/// Lookups hand out snapshots, so dispatch never holds the lock while a
/// handler runs and `add` can proceed concurrently.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this is the first handler for `topic`.
    pub fn add(&self, subscription: Arc<Subscription>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let topic = subscription.topic.clone();

        let first = !inner.handlers.contains_key(&topic);
        if first {
            inner.order.push(topic.clone());
        }

        inner
            .handlers
            .entry(topic)
            .or_default()
            .push(subscription);

        first
    }

    /// Drops one previously added handler. The topic is forgotten once its
    /// last handler is gone.
    pub fn remove(&self, subscription: &Arc<Subscription>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let topic = subscription.topic.clone();

        let Some(handlers) = inner.handlers.get_mut(&topic) else {
            return;
        };
        handlers.retain(|existing| !Arc::ptr_eq(existing, subscription));

        if handlers.is_empty() {
            inner.handlers.remove(&topic);
            inner.order.retain(|pattern| *pattern != topic);
        }
    }

    /// Handlers whose pattern matches `topic`, patterns in registration order
    /// and handlers within a pattern in the order they were added.
    pub fn handlers_for(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        inner
            .order
            .iter()
            .filter(|pattern| topics::matches(pattern, topic))
            .filter_map(|pattern| inner.handlers.get(pattern))
            .flat_map(|handlers| handlers.iter().cloned())
            .collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .contains_key(topic)
    }

    pub fn handler_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .values()
            .map(Vec::len)
            .sum()
    }
}
