//! Inbound router.
//!
//! Classifies every message from the worker and routes it:
//!
//! - `worker_event` goes to the event fan-out and never touches the registry
//! - `worker_response` advances the matching call; only a final reply removes it
//! - `worker_error` rejects the matching call and removes it
//!
//! Messages for ids that are not registered are logged and dropped. Any
//! message bearing an id clears that id's unresolved record.

use crate::domain::correlation::CorrelationId;
use crate::domain::envelope::{DecodeError, Envelope};
use crate::domain::error::{MuxError, RemoteError};
use crate::domain::pending::{PendingCall, PendingStats};
use crate::domain::unresolved::UnresolvedRecord;
use crate::ipc::channel::{IpcError, WorkerReceiver};
use crate::ipc::state::SharedState;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};
use worker_events::{EventPublisher, WorkerEvent};

/// Routes inbound messages to pending calls and event subscribers.
#[derive(Clone)]
pub struct InboundRouter {
    state: Arc<SharedState>,
    publisher: Arc<dyn EventPublisher>,
}

impl InboundRouter {
    pub(crate) fn new(state: Arc<SharedState>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { state, publisher }
    }

    /// Run the router loop until the channel closes.
    ///
    /// On close every call still pending is rejected with
    /// `MuxError::ChannelClosed`.
    pub async fn run(self, receiver: Arc<dyn WorkerReceiver>) {
        loop {
            match receiver.receive().await {
                Ok(raw) => self.on_raw(&raw),
                Err(IpcError::ChannelClosed) => {
                    warn!("Worker channel closed, stopping router");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Error receiving worker message");
                }
            }
        }
        self.fail_all(MuxError::ChannelClosed);
    }

    /// Classify a raw message and route it. Unclassifiable messages are
    /// logged and dropped.
    pub fn on_raw(&self, raw: &Value) {
        match Envelope::decode(raw) {
            Ok(envelope) => self.on_message(envelope),
            Err(DecodeError::Empty) => {
                warn!("Received message with no data from worker");
            }
            Err(DecodeError::UnknownKind(kind)) => {
                warn!(kind = %kind, "Received unknown message kind from worker");
            }
            Err(DecodeError::Malformed(reason)) => {
                warn!(reason = %reason, "Received malformed message from worker");
            }
            Err(DecodeError::ForeignCorrelationId(id)) => {
                PendingStats::incr(&self.state.stats.total_unexpected);
                error!(correlation_id = %id, "Received reply for unexpected correlation id");
            }
        }
    }

    /// Route one classified message.
    pub fn on_message(&self, envelope: Envelope) {
        match envelope {
            Envelope::Event { event } => self.on_event(event),
            Envelope::Response {
                correlation_id,
                response,
                is_final,
            } => self.on_response(correlation_id, response, is_final),
            Envelope::Error {
                correlation_id,
                error,
            } => self.on_error(correlation_id, &error),
        }
    }

    fn on_event(&self, event: WorkerEvent) {
        let subkind = event.subkind.clone();
        let delivered = self.publisher.publish(event);
        debug!(subkind = %subkind, delivered, "Published worker event");
    }

    fn on_response(&self, correlation_id: CorrelationId, response: Value, is_final: bool) {
        if !is_final {
            let unresolved = {
                let mut inflight = self.state.inflight.lock();
                let unresolved = inflight.unresolved.take(&correlation_id);
                if let Some(call) = inflight.pending.get(&correlation_id) {
                    call.deliver_chunk(response);
                    PendingStats::incr(&self.state.stats.total_chunks);
                    trace!(correlation_id = %correlation_id, "Delivered response chunk");
                    return;
                }
                unresolved
            };
            self.unexpected(correlation_id, unresolved);
            return;
        }

        let (call, unresolved) = self.take_call(&correlation_id);
        let Some(call) = call else {
            self.unexpected(correlation_id, unresolved);
            return;
        };

        PendingStats::incr(&self.state.stats.total_completed);
        debug!(
            correlation_id = %correlation_id,
            kind = %call.kind,
            elapsed_ms = elapsed_ms(&call),
            "Resolved request"
        );
        // Open the gate before waking the caller so it can send at once.
        if call.handshake {
            self.state.gate.mark_connected();
        }
        call.complete(Ok(response));
    }

    fn on_error(&self, correlation_id: CorrelationId, serialized: &str) {
        let (call, unresolved) = self.take_call(&correlation_id);
        let Some(call) = call else {
            self.unexpected(correlation_id, unresolved);
            return;
        };

        let remote = RemoteError::from_serialized(serialized);
        PendingStats::incr(&self.state.stats.total_failed);
        debug!(
            correlation_id = %correlation_id,
            kind = %call.kind,
            error = %remote,
            "Worker rejected request"
        );
        call.complete(Err(MuxError::Remote(remote)));
    }

    /// Remove the call and clear any unresolved record in one critical section.
    fn take_call(
        &self,
        correlation_id: &CorrelationId,
    ) -> (Option<PendingCall>, Option<UnresolvedRecord>) {
        let mut inflight = self.state.inflight.lock();
        let unresolved = inflight.unresolved.take(correlation_id);
        (inflight.pending.remove(correlation_id), unresolved)
    }

    fn unexpected(&self, correlation_id: CorrelationId, unresolved: Option<UnresolvedRecord>) {
        PendingStats::incr(&self.state.stats.total_unexpected);
        match unresolved {
            Some(record) => error!(
                correlation_id = %correlation_id,
                kind = %record.kind,
                elapsed_ms = u64::try_from(record.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Received reply for unexpected correlation id"
            ),
            None => error!(
                correlation_id = %correlation_id,
                "Received reply for unexpected correlation id"
            ),
        }
    }

    fn fail_all(&self, error: MuxError) {
        let calls = self.state.inflight.lock().pending.drain();
        if calls.is_empty() {
            return;
        }
        info!(count = calls.len(), "Rejecting pending requests after channel close");
        for call in calls {
            PendingStats::incr(&self.state.stats.total_failed);
            call.complete(Err(error.clone()));
        }
    }
}

fn elapsed_ms(call: &PendingCall) -> u64 {
    u64::try_from(call.sent_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::MuxConfig;
    use crate::domain::connection::ConnectionState;
    use crate::domain::pending::{ResponseSink, StatsSnapshot};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use worker_events::{EventFanout, EventFilter};

    fn router() -> (Arc<SharedState>, InboundRouter) {
        let state = SharedState::new(MuxConfig::default());
        let publisher: Arc<dyn EventPublisher> = state.events.clone();
        (Arc::clone(&state), InboundRouter::new(state, publisher))
    }

    fn register_unary(
        state: &SharedState,
        kind: &str,
    ) -> (CorrelationId, oneshot::Receiver<Result<Value, MuxError>>) {
        let id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        let handshake = kind == "init";
        state
            .inflight
            .lock()
            .pending
            .insert(PendingCall::new(
                id,
                kind,
                Duration::from_secs(90),
                handshake,
                ResponseSink::Unary(tx),
            ))
            .unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_final_response_resolves_and_removes() {
        let (state, router) = router();
        let (id, rx) = register_unary(&state, "getUser");

        router.on_raw(&json!({
            "kind": "worker_response",
            "correlationId": id.to_string(),
            "response": { "name": "alice" },
            "final": true,
        }));

        assert_eq!(rx.await.unwrap().unwrap()["name"], "alice");
        assert!(state.inflight.lock().pending.is_empty());
        assert_eq!(state.stats.snapshot().completed, 1);
    }

    #[tokio::test]
    async fn test_non_final_chunk_keeps_entry() {
        let (state, router) = router();
        let id = CorrelationId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .inflight
            .lock()
            .pending
            .insert(PendingCall::new(
                id,
                "getMessages",
                Duration::from_secs(90),
                false,
                ResponseSink::Stream(tx),
            ))
            .unwrap();

        router.on_message(Envelope::Response {
            correlation_id: id,
            response: json!(1),
            is_final: false,
        });

        assert_eq!(rx.recv().await.unwrap().unwrap(), json!(1));
        assert!(state.inflight.lock().pending.contains(&id));
    }

    #[tokio::test]
    async fn test_error_rejects_with_remote_error() {
        let (state, router) = router();
        let (id, rx) = register_unary(&state, "deleteChat");

        router.on_message(Envelope::Error {
            correlation_id: id,
            error: r#"{"message":"chat not found"}"#.into(),
        });

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.as_remote().unwrap().message(), Some("chat not found"));
        assert!(state.inflight.lock().pending.is_empty());
        assert_eq!(state.stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_handshake_final_marks_connected() {
        let (state, router) = router();
        state.gate.begin_connecting().unwrap();
        let (id, rx) = register_unary(&state, "init");

        router.on_message(Envelope::Response {
            correlation_id: id,
            response: json!(null),
            is_final: true,
        });

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(state.gate.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_unknown_id_is_contained() {
        let (state, router) = router();
        let (other, mut rx) = register_unary(&state, "getUser");

        router.on_message(Envelope::Response {
            correlation_id: CorrelationId::new(),
            response: json!("stray"),
            is_final: true,
        });
        router.on_message(Envelope::Error {
            correlation_id: CorrelationId::new(),
            error: "oops".into(),
        });

        assert!(rx.try_recv().is_err());
        assert!(state.inflight.lock().pending.contains(&other));
        assert_eq!(state.stats.snapshot().unexpected, 2);
    }

    #[tokio::test]
    async fn test_late_reply_clears_unresolved_record() {
        let (state, router) = router();
        let id = CorrelationId::new();
        state.inflight.lock().unresolved.record(
            id,
            UnresolvedRecord {
                kind: "foo".into(),
                sent_at: tokio::time::Instant::now(),
            },
        );

        router.on_message(Envelope::Response {
            correlation_id: id,
            response: json!(1),
            is_final: false,
        });

        assert!(!state.inflight.lock().unresolved.contains(&id));
        assert_eq!(state.stats.snapshot().unexpected, 1);
    }

    #[tokio::test]
    async fn test_unclassifiable_messages_are_dropped() {
        let (state, router) = router();
        router.on_raw(&Value::Null);
        router.on_raw(&json!({}));
        router.on_raw(&json!({ "kind": "mystery" }));
        router.on_raw(&json!({ "kind": "worker_error" }));
        assert_eq!(state.stats.snapshot(), StatsSnapshot::default());
    }

    #[tokio::test]
    async fn test_non_uuid_reply_id_counts_as_unexpected() {
        let (state, router) = router();
        let (other, mut rx) = register_unary(&state, "getUser");

        router.on_raw(&json!({
            "kind": "worker_response",
            "correlationId": "123456789",
            "response": "stray",
            "final": true,
        }));

        assert!(rx.try_recv().is_err());
        assert!(state.inflight.lock().pending.contains(&other));
        assert_eq!(state.stats.snapshot().unexpected, 1);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers_only() {
        let fanout = Arc::new(EventFanout::new());
        let state = SharedState::new(MuxConfig::default());
        let router = InboundRouter::new(Arc::clone(&state), fanout.clone());
        let mut sub = fanout.subscribe(EventFilter::all());

        router.on_message(Envelope::Event {
            event: WorkerEvent::new("users_loaded"),
        });

        assert_eq!(sub.recv().await.unwrap().subkind, "users_loaded");
        assert_eq!(fanout.events_published(), 1);
        assert!(state.inflight.lock().pending.is_empty());
    }

    #[tokio::test]
    async fn test_run_fails_pending_on_close() {
        use crate::ipc::channel::memory::channel_pair;

        let (state, router) = router();
        let (_sender, receiver, worker) = channel_pair();
        let (id, rx) = register_unary(&state, "getUser");

        let task = tokio::spawn(router.run(Arc::new(receiver)));
        drop(worker);
        task.await.unwrap();

        assert_eq!(rx.await.unwrap(), Err(MuxError::ChannelClosed));
        assert!(!state.inflight.lock().pending.contains(&id));
    }
}
