//! Event Bus Adapter: publishes domain events at-least-once, subscribes
//! rule-filtered consumers, dead-letters after bounded retries.
//!
//! Grounded in the teacher's `EventSidecar` (events.rs, channel-based
//! publish) and dead-letter-queue pattern (resilience/dlq.rs). Consumers are
//! modeled as a `(source_prefix, type_set) -> handler` subscription, per the
//! teacher's re-architecture note on imperative per-rule Lambdas (design
//! notes, §9).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::events::{Event, Source};
use crate::resilience::retry::RetryPolicy;

pub type HandlerFuture = Pin<Box<dyn Future<Output = DispatchResult<()>> + Send>>;

/// A rule-filtered event consumer.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Whether this handler wants to see `event` (routes by source/type).
    fn matches(&self, event: &Event) -> bool;

    async fn handle(&self, event: Event) -> DispatchResult<()>;
}

/// Simple closure-backed handler for a single source + discriminant match,
/// built from a predicate and an async closure.
pub struct FnHandler<F> {
    pub predicate: Arc<dyn Fn(&Event) -> bool + Send + Sync>,
    pub f: F,
}

#[async_trait::async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = DispatchResult<()>> + Send + 'static,
{
    fn matches(&self, event: &Event) -> bool {
        (self.predicate)(event)
    }

    async fn handle(&self, event: Event) -> DispatchResult<()> {
        (self.f)(event).await
    }
}

/// A dead-lettered delivery attempt.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: Event,
    pub error: String,
    pub attempts: u32,
}

/// Bounded dead letter queue for publishes that exhausted retries.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    pub fn push(&self, entry: DeadLetter) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.max_size {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn drain(&self) -> Vec<DeadLetter> {
        self.entries.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Event bus interface (spec §6: `EventBus.publish`, `EventBus.subscribe`).
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> DispatchResult<()>;
    fn subscribe(&self, handler: Arc<dyn EventHandler>);
}

/// In-process event bus. Delivers at-least-once to every matching
/// subscriber; a subscriber whose handler fails is retried per
/// [`RetryPolicy`], then dead-lettered. Does not guarantee cross-incident
/// ordering (spec §5); within one publisher task, publishes are delivered
/// in call order.
pub struct InMemoryEventBus {
    subscribers: parking_lot::RwLock<Vec<Arc<dyn EventHandler>>>,
    dlq: Arc<DeadLetterQueue>,
    retry: RetryPolicy,
    published: Mutex<Vec<Event>>,
}

impl InMemoryEventBus {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            subscribers: parking_lot::RwLock::new(Vec::new()),
            dlq: Arc::new(DeadLetterQueue::new(1000)),
            retry,
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn dead_letter_queue(&self) -> Arc<DeadLetterQueue> {
        self.dlq.clone()
    }

    /// Test/inspection helper: events published so far, in order.
    pub fn published_events(&self) -> Vec<Event> {
        self.published.lock().clone()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait::async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> DispatchResult<()> {
        self.published.lock().push(event.clone());
        debug!(event_id = %event.event_id, "publishing event");

        let handlers: Vec<Arc<dyn EventHandler>> =
            self.subscribers.read().iter().filter(|h| h.matches(&event)).cloned().collect();

        for handler in handlers {
            let event = event.clone();
            let result = self
                .retry
                .execute(|| {
                    let handler = handler.clone();
                    let event = event.clone();
                    async move { handler.handle(event).await }
                })
                .await;

            if let Err(e) = result {
                warn!(event_id = %event.event_id, error = %e, "dead-lettering event after exhausting retries");
                self.dlq.push(DeadLetter {
                    event: event.clone(),
                    error: e.to_string(),
                    attempts: self.retry.max_attempts,
                });
            }
        }

        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.subscribers.write().push(handler);
    }
}

pub fn type_name(event: &Event) -> &'static str {
    use crate::events::EventType::*;
    match &event.detail {
        IncidentCreated { .. } => "IncidentCreated",
        IncidentCancelled { .. } => "IncidentCancelled",
        OfferCreated { .. } => "OfferCreated",
        OfferAccepted { .. } => "OfferAccepted",
        OfferDeclined { .. } => "OfferDeclined",
        OfferExpired { .. } => "OfferExpired",
        OfferCancelled { .. } => "OfferCancelled",
        IncidentAssigned { .. } => "IncidentAssigned",
        IncidentEscalated { .. } => "IncidentEscalated",
        VendorTimeout { .. } => "VendorTimeout",
        IncidentStatusChanged { .. } => "IncidentStatusChanged",
    }
}

impl From<DispatchError> for Box<dyn std::error::Error + Send + Sync> {
    fn from(e: DispatchError) -> Self {
        Box::new(e)
    }
}
