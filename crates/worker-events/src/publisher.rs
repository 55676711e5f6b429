//! # Event Publisher
//!
//! Defines the publishing side of the fan-out.

use crate::events::{EventFilter, WorkerEvent};
use crate::subscriber::{EventStream, Subscription};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Trait for publishing events to subscribers.
///
/// The inbound router depends on this seam rather than on [`EventFanout`]
/// so that embedders can bridge events elsewhere.
pub trait EventPublisher: Send + Sync {
    /// Publish an event.
    ///
    /// # Returns
    ///
    /// The number of subscribers that received the event.
    fn publish(&self, event: WorkerEvent) -> usize;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;
}

/// One attached subscriber.
pub(crate) struct SubscriberSlot {
    pub(crate) id: u64,
    pub(crate) filter: EventFilter,
    pub(crate) sender: mpsc::UnboundedSender<WorkerEvent>,
}

/// Subscriber list shared between the fan-out and its subscription handles.
pub(crate) type SubscriberList = Arc<RwLock<Vec<SubscriberSlot>>>;

/// In-memory event fan-out.
///
/// Subscribers are kept in attachment order. Each one owns an unbounded
/// queue, so `publish()` never waits on a slow consumer.
pub struct EventFanout {
    /// Attached subscribers, in subscription order.
    subscribers: SubscriberList,

    /// Next subscription id.
    next_id: AtomicU64,

    /// Total events published.
    events_published: AtomicU64,
}

impl EventFanout {
    /// Create an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            events_published: AtomicU64::new(0),
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// Returns a `Subscription` handle that can be used to receive events.
    /// Dropping the handle detaches the subscriber.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut subs) = self.subscribers.write() {
            subs.push(SubscriberSlot {
                id,
                filter: filter.clone(),
                sender,
            });
        }

        debug!(subscription_id = id, subkinds = ?filter.subkinds, "New subscription created");

        Subscription::new(id, receiver, filter, Arc::downgrade(&self.subscribers))
    }

    /// Get a stream of events matching a filter.
    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        EventStream::new(self.subscribe(filter))
    }

    /// Get the number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|subs| subs.len()).unwrap_or(0)
    }

    /// Detach subscribers whose receiving side is gone.
    fn prune_closed(&self) {
        if let Ok(mut subs) = self.subscribers.write() {
            subs.retain(|slot| !slot.sender.is_closed());
        }
    }
}

impl Default for EventFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for EventFanout {
    fn publish(&self, event: WorkerEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        // Snapshot first: subscribers attached from here on miss this event.
        let targets: Vec<(u64, mpsc::UnboundedSender<WorkerEvent>)> = match self.subscribers.read()
        {
            Ok(subs) => subs
                .iter()
                .filter(|slot| slot.filter.matches(&event))
                .map(|slot| (slot.id, slot.sender.clone()))
                .collect(),
            Err(_) => Vec::new(),
        };

        let mut delivered = 0;
        let mut saw_closed = false;
        for (id, sender) in targets {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!(subscription_id = id, "Subscriber gone during delivery");
                saw_closed = true;
            }
        }

        if saw_closed {
            self.prune_closed();
        }

        debug!(subkind = %event.subkind, receivers = delivered, "Event published");
        delivered
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
