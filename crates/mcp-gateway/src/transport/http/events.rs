//! Server-sent event fan-out.
//!
//! Each SSE connection owns a bounded channel receiver; the broadcaster keeps
//! the matching senders. A subscriber is unregistered when its stream is
//! dropped, which axum does as soon as the client goes away.

use crate::config::HttpDefaults;
use crate::{GatewayError, Result};
use futures::Stream;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

/// One named event, serialized once and shared by every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub event: String,
    pub data: String,
}

type Subscribers = HashMap<Uuid, mpsc::Sender<Arc<PushEvent>>>;

/// Owns the set of live SSE subscribers.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(HttpDefaults::SUBSCRIBER_QUEUE);
        let count = {
            let mut subscribers = self.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        debug!("SSE subscriber {} connected ({} active)", id, count);

        Subscription {
            rx,
            _guard: SubscriptionGuard {
                id,
                subscribers: Arc::downgrade(&self.subscribers),
            },
        }
    }

    /// Send `payload` as event `event` to every subscriber.
    ///
    /// Returns how many subscribers accepted it. A full or closed subscriber
    /// is skipped; closed ones are pruned.
    pub fn broadcast<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> Result<usize> {
        if event.contains(['\n', '\r']) {
            return Err(GatewayError::Validation {
                field: "event".to_string(),
                message: "event name must not contain line breaks".to_string(),
            });
        }

        let event = Arc::new(PushEvent {
            event: event.to_string(),
            data: serde_json::to_string(payload)?,
        });

        let mut delivered = 0;
        let mut subscribers = self.lock();
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("SSE subscriber {} is lagging, dropped {}", id, event.event);
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Pruning closed SSE subscriber {}", id);
                false
            }
        });

        debug!(
            "Broadcast {} to {}/{} subscribers",
            event.event,
            delivered,
            subscribers.len()
        );
        Ok(delivered)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop every subscriber, ending their streams.
    pub fn close_all(&self) {
        let mut subscribers = self.lock();
        if !subscribers.is_empty() {
            debug!("Closing {} SSE subscribers", subscribers.len());
        }
        subscribers.clear();
    }
}

/// A registered subscriber. Dropping it unregisters.
pub struct Subscription {
    rx: mpsc::Receiver<Arc<PushEvent>>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Arc<PushEvent>> {
        self.rx.recv().await
    }

    /// Convert into a stream that ends when the broadcaster closes it.
    pub fn into_stream(self) -> impl Stream<Item = Arc<PushEvent>> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}

struct SubscriptionGuard {
    id: Uuid,
    subscribers: std::sync::Weak<Mutex<Subscribers>>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            let mut subscribers = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            if subscribers.remove(&self.id).is_some() {
                debug!("SSE subscriber {} disconnected ({} active)", self.id, subscribers.len());
            }
        }
    }
}
