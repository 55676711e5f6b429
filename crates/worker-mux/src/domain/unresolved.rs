//! Unresolved request records.
//!
//! When a request times out, its kind and send time are kept so that a
//! reply arriving later can be logged with context instead of silently
//! dropped. Any message bearing the id clears the record.
//!
//! ## Bounds
//!
//! - At most `capacity` records; the oldest is evicted first.
//! - Records older than `retention` are garbage-collected on insert.

use crate::domain::correlation::CorrelationId;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Diagnostic trace of a request whose deadline fired before any reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRecord {
    /// Request kind
    pub kind: String,
    /// When the request was dispatched
    pub sent_at: Instant,
}

impl UnresolvedRecord {
    /// Time since the request was dispatched.
    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }
}

struct Entry {
    record: UnresolvedRecord,
    recorded_at: Instant,
}

/// Bounded store of unresolved records, keyed by correlation id.
pub struct UnresolvedStore {
    /// Map of correlation ID -> record
    records: HashMap<CorrelationId, Entry>,
    /// Insertion order, oldest first. May hold ids already taken.
    order: VecDeque<CorrelationId>,
    capacity: usize,
    retention: Duration,
}

impl UnresolvedStore {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            retention,
        }
    }

    /// Record a timed-out request.
    pub fn record(&mut self, correlation_id: CorrelationId, record: UnresolvedRecord) {
        let now = Instant::now();
        self.collect_expired(now);

        if self
            .records
            .insert(
                correlation_id,
                Entry {
                    record,
                    recorded_at: now,
                },
            )
            .is_none()
        {
            self.order.push_back(correlation_id);
        }

        while self.records.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.records.remove(&oldest).is_some() {
                debug!(correlation_id = %oldest, "Evicted unresolved record (capacity)");
            }
        }

        if self.order.len() > self.capacity * 2 {
            let records = &self.records;
            self.order.retain(|id| records.contains_key(id));
        }
    }

    /// Remove and return the record for an id.
    pub fn take(&mut self, correlation_id: &CorrelationId) -> Option<UnresolvedRecord> {
        self.records.remove(correlation_id).map(|entry| entry.record)
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.records.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect_expired(&mut self, now: Instant) {
        while let Some(oldest) = self.order.front().copied() {
            match self.records.get(&oldest) {
                Some(entry) if now.duration_since(entry.recorded_at) < self.retention => break,
                Some(_) => {
                    self.records.remove(&oldest);
                    debug!(correlation_id = %oldest, "Expired unresolved record (retention)");
                }
                None => {}
            }
            self.order.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: &str) -> UnresolvedRecord {
        UnresolvedRecord {
            kind: kind.to_string(),
            sent_at: Instant::now(),
        }
    }

    #[test]
    fn test_record_and_take() {
        let mut store = UnresolvedStore::new(8, Duration::from_secs(60));
        let id = CorrelationId::new();

        store.record(id, record("foo"));
        assert!(store.contains(&id));
        assert_eq!(store.len(), 1);

        let taken = store.take(&id).unwrap();
        assert_eq!(taken.kind, "foo");
        assert!(store.take(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = UnresolvedStore::new(2, Duration::from_secs(60));
        let ids: Vec<_> = (0..3).map(|_| CorrelationId::new()).collect();

        for id in &ids {
            store.record(*id, record("foo"));
        }

        assert_eq!(store.len(), 2);
        assert!(!store.contains(&ids[0]));
        assert!(store.contains(&ids[1]));
        assert!(store.contains(&ids[2]));
    }

    #[test]
    fn test_taken_ids_do_not_count_against_capacity() {
        let mut store = UnresolvedStore::new(2, Duration::from_secs(60));
        for _ in 0..10 {
            let id = CorrelationId::new();
            store.record(id, record("foo"));
            store.take(&id);
        }
        let keep = CorrelationId::new();
        store.record(keep, record("bar"));
        assert!(store.contains(&keep));
        assert!(store.order.len() <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_expires_old_records() {
        let mut store = UnresolvedStore::new(8, Duration::from_secs(10));
        let old = CorrelationId::new();
        store.record(old, record("old"));

        tokio::time::advance(Duration::from_secs(11)).await;

        let fresh = CorrelationId::new();
        store.record(fresh, record("fresh"));
        assert!(!store.contains(&old));
        assert!(store.contains(&fresh));
    }
}
