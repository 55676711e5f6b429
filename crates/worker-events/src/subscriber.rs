//! # Event Subscriber
//!
//! Defines the subscription side of the fan-out.

use crate::events::{EventFilter, WorkerEvent};
use crate::publisher::SubscriberSlot;
use std::pin::Pin;
use std::sync::{RwLock, Weak};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The fan-out was dropped.
    #[error("Event fan-out closed")]
    Closed,
}

/// A subscription handle for receiving events.
///
/// When dropped, the subscriber is detached from the fan-out.
pub struct Subscription {
    /// Subscription id, unique per fan-out.
    id: u64,

    /// Per-subscriber event queue.
    receiver: mpsc::UnboundedReceiver<WorkerEvent>,

    /// Filter for this subscription.
    filter: EventFilter,

    /// Back-reference for cleanup; weak so a dropped fan-out closes the queue.
    subscribers: Weak<RwLock<Vec<SubscriberSlot>>>,
}

impl Subscription {
    /// Create a new subscription.
    pub(crate) fn new(
        id: u64,
        receiver: mpsc::UnboundedReceiver<WorkerEvent>,
        filter: EventFilter,
        subscribers: Weak<RwLock<Vec<SubscriberSlot>>>,
    ) -> Self {
        Self {
            id,
            receiver,
            filter,
            subscribers,
        }
    }

    /// Receive the next event.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next matching event
    /// - `None` - The fan-out was dropped
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.receiver.recv().await
    }

    /// Try to receive the next event without waiting.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was queued
    /// - `Ok(None)` - No event queued
    /// - `Err(SubscriptionError::Closed)` - The fan-out was dropped
    pub fn try_recv(&mut self) -> Result<Option<WorkerEvent>, SubscriptionError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    /// Get the filter for this subscription.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Get the subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return;
        };
        let Ok(mut subs) = subscribers.write() else {
            return;
        };
        subs.retain(|slot| slot.id != self.id);
        debug!(subscription_id = self.id, "Subscription dropped");
    }
}

/// A stream wrapper for subscriptions.
///
/// Implements `tokio_stream::Stream` for use with stream combinators.
pub struct EventStream {
    subscription: Subscription,
}

impl EventStream {
    /// Create a new event stream from a subscription.
    #[must_use]
    pub fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    /// Get the filter for this stream.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        self.subscription.filter()
    }
}

impl Stream for EventStream {
    type Item = WorkerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.subscription.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{STORAGE_UPDATED, USERS_LOADED};
    use crate::publisher::{EventFanout, EventPublisher};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_subscription_recv() {
        let fanout = EventFanout::new();
        let mut sub = fanout.subscribe(EventFilter::all());

        fanout.publish(WorkerEvent::new(STORAGE_UPDATED));

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received.subkind, STORAGE_UPDATED);
    }

    #[tokio::test]
    async fn test_subscription_filter() {
        let fanout = EventFanout::new();
        let mut sub = fanout.subscribe(EventFilter::subkinds([USERS_LOADED]));

        fanout.publish(WorkerEvent::new(STORAGE_UPDATED));
        fanout.publish(WorkerEvent::new(USERS_LOADED));

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received.subkind, USERS_LOADED);
        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_delivery_order_per_subscriber() {
        let fanout = EventFanout::new();
        let mut sub = fanout.subscribe(EventFilter::all());

        for i in 0..5u64 {
            fanout.publish(WorkerEvent::new(STORAGE_UPDATED).with_field("seq", i.into()));
        }

        for i in 0..5u64 {
            let event = sub.try_recv().unwrap().unwrap();
            assert_eq!(event.field("seq"), Some(&serde_json::json!(i)));
        }
    }

    #[tokio::test]
    async fn test_subscription_drop_cleanup() {
        let fanout = EventFanout::new();
        {
            let _sub1 = fanout.subscribe(EventFilter::all());
            let _sub2 = fanout.subscribe(EventFilter::all());
            assert_eq!(fanout.subscriber_count(), 2);
        }
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_when_fanout_dropped() {
        let fanout = EventFanout::new();
        let mut sub = fanout.subscribe(EventFilter::all());
        drop(fanout);

        assert_eq!(sub.try_recv(), Err(SubscriptionError::Closed));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_event_stream() {
        let fanout = EventFanout::new();
        let mut stream = fanout.event_stream(EventFilter::subkinds([STORAGE_UPDATED]));
        assert_eq!(EventStream::filter(&stream).subkinds.len(), 1);

        fanout.publish(WorkerEvent::new(STORAGE_UPDATED));
        let event = timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(event.subkind, STORAGE_UPDATED);
    }
}
