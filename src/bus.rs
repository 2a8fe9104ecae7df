//! EventBus - fan-out of serialized state events to live subscribers
//!
//! Each subscriber owns a bounded queue. Publishing serializes the event once
//! and offers it to every queue without blocking; a subscriber whose queue is
//! full (or whose receiver is gone) is evicted on the spot.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::state::Event;

/// Default per-subscriber queue bound
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Serialized event as delivered to subscribers
pub type Message = Arc<str>;

/// Identifier of a registered subscriber
pub type SubscriberId = u64;

struct Registry {
    next_id: SubscriberId,
    subscribers: Vec<(SubscriberId, Sender<Message>)>,
}

/// Broadcasts serialized events to bounded subscriber queues
pub struct EventBus {
    registry: Mutex<Registry>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default queue capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a bus whose subscriber queues hold at most `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 1,
                subscribers: Vec::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber with an empty queue
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with(std::iter::empty())
    }

    /// Register a new subscriber whose queue is pre-filled with `catch_up`
    ///
    /// The catch-up burst is enqueued while the registry is locked, so no
    /// concurrent publish can slip in ahead of it. If the burst alone overflows
    /// the queue the subscriber is never registered; it drains what fit and then
    /// sees a disconnect.
    pub fn subscribe_with<'a, I>(&self, catch_up: I) -> Subscription
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let (tx, rx) = channel::bounded(self.capacity);
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;

        let mut overflowed = false;
        for event in catch_up {
            let Some(data) = serialize(event) else {
                continue;
            };
            if tx.try_send(data).is_err() {
                overflowed = true;
                break;
            }
        }

        if overflowed {
            warn!(subscriber = id, "catch-up burst overflowed queue, subscriber dropped");
        } else {
            registry.subscribers.push((id, tx));
            debug!(subscriber = id, total = registry.subscribers.len(), "subscriber registered");
        }

        Subscription { id, rx }
    }

    /// Remove a subscriber; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut registry = self.registry.lock();
        let before = registry.subscribers.len();
        registry.subscribers.retain(|(sid, _)| *sid != id);
        if registry.subscribers.len() != before {
            debug!(subscriber = id, "subscriber removed");
        }
    }

    /// Publish an event to every live subscriber
    pub fn publish(&self, event: &Event) {
        if let Some(data) = serialize(event) {
            self.publish_raw(data);
        }
    }

    /// Publish an already serialized message
    pub fn publish_raw(&self, data: Message) {
        let mut registry = self.registry.lock();
        registry
            .subscribers
            .retain(|(id, tx)| match tx.try_send(Arc::clone(&data)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = *id, "subscriber queue full, dropping subscriber");
                    false
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(subscriber = *id, "subscriber disconnected");
                    false
                }
            });
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }

    /// Whether `id` is still registered
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.registry
            .lock()
            .subscribers
            .iter()
            .any(|(sid, _)| *sid == id)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize(event: &Event) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(s) => Some(Arc::from(s)),
        Err(e) => {
            warn!("Failed to serialize event {:?}: {}", event, e);
            None
        }
    }
}

/// Receiving end of a subscriber queue
///
/// Dropping the subscription is enough to disconnect: the bus evicts it on
/// the next publish.
pub struct Subscription {
    id: SubscriberId,
    rx: Receiver<Message>,
}

impl Subscription {
    /// Subscriber id, for [`EventBus::unsubscribe`]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Block until the next message; `None` once the subscriber was evicted and drained
    pub fn recv(&self) -> Option<Message> {
        self.rx.recv().ok()
    }

    /// Block for up to `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Take the next message if one is queued
    pub fn try_recv(&self) -> Result<Message, TryRecvError> {
        self.rx.try_recv()
    }

    /// Drain everything currently queued
    pub fn drain(&self) -> Vec<Message> {
        self.rx.try_iter().collect()
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Underlying receiver, for use with `crossbeam::select!`
    pub fn receiver(&self) -> &Receiver<Message> {
        &self.rx
    }
}
