//! Correlation registry - the sole source of truth for in-flight requests.
//!
//! Maps correlation IDs to the waiting caller's response sink.
//!
//! Flow:
//! 1. Dispatcher generates a CorrelationId and calls `insert()`
//! 2. Dispatcher posts the request to the worker
//! 3. Inbound router delivers chunks with `get()` and removes the call on
//!    a final reply or an error
//! 4. Otherwise the timeout supervisor removes it when the deadline fires

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{MuxError, MuxResult};
use crate::ipc::timeout::TimeoutHandle;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Where replies for one call are delivered: the Rust form of the
/// resolve/reject continuation pair.
#[derive(Debug)]
pub enum ResponseSink {
    /// Single-result call; resolved once by the final reply.
    Unary(oneshot::Sender<MuxResult<Value>>),
    /// Streaming call; every chunk is forwarded, the sink is dropped after
    /// the terminal item.
    Stream(mpsc::UnboundedSender<MuxResult<Value>>),
}

impl ResponseSink {
    /// Forward a non-final chunk. Unary sinks ignore it.
    ///
    /// Returns false if the caller has gone away.
    fn chunk(&self, value: Value) -> bool {
        match self {
            ResponseSink::Unary(tx) => !tx.is_closed(),
            ResponseSink::Stream(tx) => tx.send(Ok(value)).is_ok(),
        }
    }

    /// Deliver the terminal result and close the sink.
    fn finish(self, result: MuxResult<Value>) -> bool {
        match self {
            ResponseSink::Unary(tx) => tx.send(result).is_ok(),
            ResponseSink::Stream(tx) => tx.send(result).is_ok(),
        }
    }

    fn is_stream(&self) -> bool {
        matches!(self, ResponseSink::Stream(_))
    }
}

/// One outstanding request awaiting reply.
#[derive(Debug)]
pub struct PendingCall {
    /// Correlation ID of this request
    pub correlation_id: CorrelationId,
    /// Request kind (for logging)
    pub kind: String,
    /// When the request was dispatched
    pub sent_at: Instant,
    /// Timeout for this request
    pub timeout: Duration,
    /// Whether this is the connection handshake
    pub handshake: bool,
    /// Channel to deliver replies
    sink: ResponseSink,
    /// Scheduled timeout action
    deadline: Option<TimeoutHandle>,
}

impl PendingCall {
    pub fn new(
        correlation_id: CorrelationId,
        kind: impl Into<String>,
        timeout: Duration,
        handshake: bool,
        sink: ResponseSink,
    ) -> Self {
        Self {
            correlation_id,
            kind: kind.into(),
            sent_at: Instant::now(),
            timeout,
            handshake,
            sink,
            deadline: None,
        }
    }

    /// Attach the scheduled timeout action.
    pub fn with_deadline(mut self, deadline: TimeoutHandle) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Forward an intermediate chunk. The call stays registered.
    pub fn deliver_chunk(&self, value: Value) -> bool {
        let delivered = self.sink.chunk(value);
        if !self.sink.is_stream() {
            trace!(
                correlation_id = %self.correlation_id,
                kind = %self.kind,
                "Ignoring non-final chunk for single-result request"
            );
        }
        delivered
    }

    /// Terminal resolution by the router: cancel the deadline, then deliver.
    pub fn complete(mut self, result: MuxResult<Value>) -> bool {
        self.cancel_deadline();
        self.deliver(result)
    }

    /// Terminal resolution by the deadline itself. The handle is dropped,
    /// not cancelled, since it belongs to the task running this.
    pub fn expire(mut self, error: MuxError) -> bool {
        self.deadline.take();
        self.deliver(Err(error))
    }

    fn deliver(self, result: MuxResult<Value>) -> bool {
        let correlation_id = self.correlation_id;
        let kind = self.kind;
        let delivered = self.sink.finish(result);
        if !delivered {
            debug!(
                correlation_id = %correlation_id,
                kind = %kind,
                "Pending request receiver dropped"
            );
        }
        delivered
    }

    fn cancel_deadline(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.cancel();
        }
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("correlation id {0} already registered")]
    Duplicate(CorrelationId),
}

impl From<RegistryError> for MuxError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Duplicate(id) => MuxError::DuplicateCorrelationId(id),
        }
    }
}

/// Map of correlation ID to pending call. At most one entry per id.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    pending: HashMap<CorrelationId, PendingCall>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call. A duplicate id is refused and the refused call's
    /// deadline is cancelled so it cannot fire against the existing entry.
    pub fn insert(&mut self, mut call: PendingCall) -> Result<(), RegistryError> {
        let id = call.correlation_id;
        if self.pending.contains_key(&id) {
            call.cancel_deadline();
            return Err(RegistryError::Duplicate(id));
        }
        self.pending.insert(id, call);
        Ok(())
    }

    pub fn get(&self, correlation_id: &CorrelationId) -> Option<&PendingCall> {
        self.pending.get(correlation_id)
    }

    pub fn remove(&mut self, correlation_id: &CorrelationId) -> Option<PendingCall> {
        self.pending.remove(correlation_id)
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove every call (used when the channel closes).
    pub fn drain(&mut self) -> Vec<PendingCall> {
        self.pending.drain().map(|(_, call)| call).collect()
    }
}

/// Statistics for the registry
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests resolved by a final reply
    pub total_completed: AtomicU64,
    /// Total requests rejected by the worker
    pub total_failed: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total replies for unknown correlation ids
    pub total_unexpected: AtomicU64,
    /// Total dispatches refused by the connection gate
    pub total_not_connected: AtomicU64,
    /// Total intermediate chunks delivered
    pub total_chunks: AtomicU64,
}

impl PendingStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            registered: self.total_registered.load(Ordering::Relaxed),
            completed: self.total_completed.load(Ordering::Relaxed),
            failed: self.total_failed.load(Ordering::Relaxed),
            timeouts: self.total_timeouts.load(Ordering::Relaxed),
            unexpected: self.total_unexpected.load(Ordering::Relaxed),
            not_connected: self.total_not_connected.load(Ordering::Relaxed),
            chunks: self.total_chunks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub unexpected: u64,
    pub not_connected: u64,
    pub chunks: u64,
}
