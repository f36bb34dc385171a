//! In-process message bus
//!
//! Backs the relay when devices and viewers share one process, and in tests.
//! Each subscription gets its own bounded channel. Publishing never waits: a
//! subscriber whose channel is full misses the message, and subscribers that
//! dropped their receiver are pruned on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{BusError, BusMessage, BusSubscription, MessageBus};

/// Default per-subscription channel capacity
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 64;

struct Inner {
    topics: RwLock<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
    capacity: usize,
    closed: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// In-process publish/subscribe bus
///
/// Cloning is cheap and every clone talks to the same topics.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    /// Create a bus with the default subscription capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Create a bus whose subscriptions buffer up to `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Messages accepted by `publish`
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Deliveries skipped because a subscriber was full
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Close the bus
    ///
    /// Ends every subscription; later publish/subscribe calls fail with
    /// `BusError::Closed`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.topics.write().clear();
    }

    fn deliver(&self, topic: &str, payload: Bytes) -> bool {
        let mut saw_closed = false;

        {
            let topics = self.inner.topics.read();
            let Some(senders) = topics.get(topic) else {
                return false;
            };

            for tx in senders {
                match tx.try_send(BusMessage::new(topic, payload.clone())) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(topic = topic, "Subscriber lagging, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }

        saw_closed
    }

    fn prune(&self, topic: &str) {
        let mut topics = self.inner.topics.write();
        if let Some(senders) = topics.get_mut(topic) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        self.inner.published.fetch_add(1, Ordering::Relaxed);

        if self.deliver(topic, payload) {
            self.prune(topic);
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.inner
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(tx);

        tracing::debug!(topic = topic, "Memory bus subscription added");

        Ok(BusSubscription::new(topic, rx))
    }
}
