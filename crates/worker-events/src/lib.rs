//! # Worker Events - Fan-out for Server-Push Notifications
//!
//! Messages arriving from the worker that are not replies to any request are
//! events. They carry a sub-kind and an opaque payload and are delivered to
//! every current subscriber whose filter accepts the sub-kind.
//!
//! ```text
//!                    ┌──────────────┐
//!   Inbound Router   │  Event       │ ──► Subscription #1 (all)
//!   ── publish() ──► │  Fan-out     │ ──► Subscription #2 (storage_updated)
//!                    │              │ ──► Subscription #3 (users_loaded)
//!                    └──────────────┘
//! ```
//!
//! ## Delivery Rules
//!
//! - Delivery is synchronous and follows subscription order.
//! - The subscriber set is snapshotted when `publish()` starts; a subscriber
//!   attached while an event is in flight does not receive that event.
//! - No replay: an event published before a subscriber attaches is lost.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{
    EventFilter, WorkerEvent, MESSAGES_READ_FROM_SERVER, STORAGE_UPDATED, USERS_LOADED,
};
pub use publisher::{EventFanout, EventPublisher};
pub use subscriber::{EventStream, Subscription, SubscriptionError};
