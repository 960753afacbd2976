//! Ordered, fallible fan-out of committed events.
//!
//! # Guarantees
//!
//! - **Emission order**: events are handed to subscribers in the order given
//! - **Subscription order**: subscribers see each event in the order they subscribed
//! - **Failures surface**: the first failing subscriber stops the dispatch and
//!   its error is returned, so the writer can report committed-but-undispatched
//!   events
//!
//! Unlike a broadcast channel, nothing is fire-and-forget here: the caller awaits
//! every subscriber before the next event goes out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::Event;
use crate::error::DispatchError;

/// Receives events after the transaction that persisted them committed.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, event: &dyn Event) -> Result<(), DispatchError>;
}

/// Ordered list of subscribers, itself a [`Dispatcher`].
///
/// Subscribers may be added after the bus was handed out, which lets stores
/// hold the bus while the handlers subscribing to it are still being built.
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(EventBus::new());
/// let apps = AppsStore::new(pool.clone(), bus.clone());
///
/// // Handlers need the stores; the scheduler needs the handlers.
/// let registry = build_registry(&apps);
/// bus.subscribe(Arc::new(JobScheduler::new(registry, queue))).await;
/// ```
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn Dispatcher>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber after every existing one.
    pub async fn subscribe(&self, subscriber: Arc<dyn Dispatcher>) {
        self.subscribers.write().await.push(subscriber);
    }

    /// Returns the number of subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[async_trait]
impl Dispatcher for EventBus {
    async fn dispatch(&self, event: &dyn Event) -> Result<(), DispatchError> {
        let subscribers = self.subscribers.read().await.clone();
        debug!(
            event = event.name(),
            subscribers = subscribers.len(),
            "dispatching event"
        );

        for subscriber in subscribers {
            subscriber.dispatch(event).await?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

/// Dispatcher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

#[async_trait]
impl Dispatcher for NoopDispatcher {
    async fn dispatch(&self, _event: &dyn Event) -> Result<(), DispatchError> {
        Ok(())
    }
}
