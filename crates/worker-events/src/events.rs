//! # Worker Events
//!
//! Defines the event type pushed by the worker and the sub-kind filter used
//! when subscribing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sub-kind: the worker finished reading messages from the server.
pub const MESSAGES_READ_FROM_SERVER: &str = "messages_read_from_server";

/// Sub-kind: the worker's storage status changed.
pub const STORAGE_UPDATED: &str = "storage_updated";

/// Sub-kind: a batch of users was loaded by the worker.
pub const USERS_LOADED: &str = "users_loaded";

/// An asynchronous notification from the worker, unrelated to any request.
///
/// On the wire the sub-kind and the payload fields share one object:
///
/// ```json
/// { "subkind": "storage_updated", "status": "full" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEvent {
    /// Event sub-kind, used for subscription filtering.
    pub subkind: String,

    /// Opaque payload; never interpreted by the multiplexer.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl WorkerEvent {
    /// Create an event with an empty payload.
    #[must_use]
    pub fn new(subkind: impl Into<String>) -> Self {
        Self {
            subkind: subkind.into(),
            payload: Map::new(),
        }
    }

    /// Add a payload field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Look up a payload field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Filter for subscribing to specific event sub-kinds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Sub-kinds to include. Empty means all sub-kinds.
    pub subkinds: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific sub-kinds.
    #[must_use]
    pub fn subkinds<I, S>(subkinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subkinds: subkinds.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &WorkerEvent) -> bool {
        self.subkinds.is_empty() || self.subkinds.iter().any(|s| *s == event.subkind)
    }
}
