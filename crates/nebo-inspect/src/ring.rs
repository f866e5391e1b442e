//! The inspector ring buffer and subscriber fan-out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::trace;

use crate::event::InspectorEvent;

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Per-subscriber channel capacity.
const SUBSCRIBER_CAPACITY: usize = 128;

struct Inner {
    ring: VecDeque<InspectorEvent>,
    capacity: usize,
    subscribers: Vec<mpsc::Sender<InspectorEvent>>,
}

/// Records gRPC events into a bounded ring and fans them out to
/// subscribers without ever blocking the producer.
pub struct Inspector {
    next_id: AtomicU64,
    subscriber_count: AtomicUsize,
    inner: Mutex<Inner>,
}

impl Inspector {
    /// Create an inspector with the given ring capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscriber_count: AtomicUsize::new(0),
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                capacity: capacity.max(1),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Whether any subscriber is attached.
    ///
    /// The fast-path gate: when false, callers skip payload marshaling and
    /// never call [`record`](Self::record).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscriber_count.load(Ordering::Relaxed) > 0
    }

    /// Record an event: assign its id, append to the ring, fan out.
    ///
    /// Slow subscribers lose events (non-blocking send); closed
    /// subscribers are pruned.
    pub fn record(&self, mut event: InspectorEvent) {
        event.id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.ring.len() == inner.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(event.clone());

        inner.subscribers.retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow subscriber: drop the event, keep the channel.
                    trace!(event_id = event.id, "Inspector subscriber full, dropping event");
                    true
                },
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Subscribe to future events. Dropping the subscription detaches it.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> InspectorSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        {
            let mut inner = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            inner.subscribers.push(tx);
        }
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);
        InspectorSubscription {
            rx,
            inspector: Arc::clone(self),
        }
    }

    /// A copy of the ring's current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<InspectorEvent> {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.ring.iter().cloned().collect()
    }
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inspector")
            .field(
                "subscriber_count",
                &self.subscriber_count.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// A live subscription to inspector events.
pub struct InspectorSubscription {
    rx: mpsc::Receiver<InspectorEvent>,
    inspector: Arc<Inspector>,
}

impl InspectorSubscription {
    /// Receive the next event, or `None` once detached.
    pub async fn recv(&mut self) -> Option<InspectorEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<InspectorEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for InspectorSubscription {
    fn drop(&mut self) {
        self.inspector
            .subscriber_count
            .fetch_sub(1, Ordering::Relaxed);
        // The sender half is pruned on the next record().
    }
}
