//! Duplex channel to the worker.
//!
//! The outbound half is synchronous and fire-and-forget; the inbound half
//! yields raw JSON messages which the router classifies.

use crate::domain::envelope::OutboundMessage;
use async_trait::async_trait;
use serde_json::Value;

/// Outbound half: posts requests to the worker.
pub trait WorkerSender: Send + Sync {
    /// Post a request. Must not block.
    fn post(&self, message: OutboundMessage) -> Result<(), IpcError>;
}

/// Inbound half: delivers messages from the worker in channel order.
#[async_trait]
pub trait WorkerReceiver: Send + Sync {
    /// Receive next message (waits until available)
    async fn receive(&self) -> Result<Value, IpcError>;
}

/// IPC error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    #[error("channel closed")]
    ChannelClosed,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// In-process transport built on Tokio channels.
///
/// ```text
/// WorkerClient ──ChannelSender──► WorkerEndpoint::recv()
/// WorkerClient ◄─ChannelReceiver── WorkerEndpoint::respond()/fail()/emit_event()
/// ```
pub mod memory {
    use super::{IpcError, WorkerReceiver, WorkerSender};
    use crate::domain::correlation::CorrelationId;
    use crate::domain::envelope::{Envelope, OutboundMessage};
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::{mpsc, Mutex};
    use worker_events::WorkerEvent;

    /// Create a connected client/worker pair.
    pub fn channel_pair() -> (ChannelSender, ChannelReceiver, WorkerEndpoint) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        (
            ChannelSender { tx: request_tx },
            ChannelReceiver {
                rx: Mutex::new(reply_rx),
            },
            WorkerEndpoint {
                requests: request_rx,
                replies: reply_tx,
            },
        )
    }

    /// Client-side outbound half.
    #[derive(Debug, Clone)]
    pub struct ChannelSender {
        tx: mpsc::UnboundedSender<OutboundMessage>,
    }

    impl WorkerSender for ChannelSender {
        fn post(&self, message: OutboundMessage) -> Result<(), IpcError> {
            self.tx.send(message).map_err(|_| IpcError::ChannelClosed)
        }
    }

    /// Client-side inbound half.
    #[derive(Debug)]
    pub struct ChannelReceiver {
        rx: Mutex<mpsc::UnboundedReceiver<Value>>,
    }

    #[async_trait]
    impl WorkerReceiver for ChannelReceiver {
        async fn receive(&self) -> Result<Value, IpcError> {
            self.rx.lock().await.recv().await.ok_or(IpcError::ChannelClosed)
        }
    }

    /// Worker side of the channel.
    ///
    /// Dropping it closes both directions.
    #[derive(Debug)]
    pub struct WorkerEndpoint {
        requests: mpsc::UnboundedReceiver<OutboundMessage>,
        replies: mpsc::UnboundedSender<Value>,
    }

    impl WorkerEndpoint {
        /// Next request posted by the client.
        pub async fn recv(&mut self) -> Option<OutboundMessage> {
            self.requests.recv().await
        }

        /// Next request if one is already queued.
        pub fn try_recv(&mut self) -> Option<OutboundMessage> {
            self.requests.try_recv().ok()
        }

        /// Send the final reply for a request.
        pub fn respond(&self, correlation_id: CorrelationId, response: Value) -> Result<(), IpcError> {
            self.respond_chunk(correlation_id, response, true)
        }

        /// Send one reply chunk; `is_final` terminates the request.
        pub fn respond_chunk(
            &self,
            correlation_id: CorrelationId,
            response: Value,
            is_final: bool,
        ) -> Result<(), IpcError> {
            self.send_envelope(&Envelope::Response {
                correlation_id,
                response,
                is_final,
            })
        }

        /// Fail a request. The error payload is serialized to a string the
        /// way the worker puts it on the wire.
        pub fn fail(&self, correlation_id: CorrelationId, error: &Value) -> Result<(), IpcError> {
            self.send_envelope(&Envelope::Error {
                correlation_id,
                error: error.to_string(),
            })
        }

        /// Push an event unrelated to any request.
        pub fn emit_event(&self, event: WorkerEvent) -> Result<(), IpcError> {
            self.send_envelope(&Envelope::Event { event })
        }

        /// Send an arbitrary message, bypassing envelope construction.
        pub fn send_raw(&self, message: Value) -> Result<(), IpcError> {
            self.replies
                .send(message)
                .map_err(|_| IpcError::ChannelClosed)
        }

        fn send_envelope(&self, envelope: &Envelope) -> Result<(), IpcError> {
            let message =
                serde_json::to_value(envelope).map_err(|e| IpcError::SendFailed(e.to_string()))?;
            self.send_raw(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::channel_pair;
    use super::*;
    use crate::domain::correlation::CorrelationId;
    use crate::domain::envelope::{Envelope, WorkerRequest};
    use serde_json::json;
    use worker_events::WorkerEvent;

    #[tokio::test]
    async fn test_request_reaches_worker() {
        let (sender, _receiver, mut worker) = channel_pair();
        let id = CorrelationId::new();

        sender
            .post(OutboundMessage {
                correlation_id: id,
                request: WorkerRequest::new("getChats"),
            })
            .unwrap();

        let message = worker.recv().await.unwrap();
        assert_eq!(message.correlation_id, id);
        assert_eq!(message.request.kind, "getChats");
        assert!(worker.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_worker_replies_are_envelopes() {
        let (_sender, receiver, worker) = channel_pair();
        let id = CorrelationId::new();

        worker.respond_chunk(id, json!(1), false).unwrap();
        worker.fail(id, &json!({ "message": "nope" })).unwrap();
        worker
            .emit_event(WorkerEvent::new("storage_updated"))
            .unwrap();

        let first = Envelope::decode(&receiver.receive().await.unwrap()).unwrap();
        assert!(matches!(first, Envelope::Response { is_final: false, .. }));

        let second = Envelope::decode(&receiver.receive().await.unwrap()).unwrap();
        let Envelope::Error { error, .. } = second else {
            panic!("expected error envelope");
        };
        assert_eq!(error, r#"{"message":"nope"}"#);

        let third = Envelope::decode(&receiver.receive().await.unwrap()).unwrap();
        assert!(matches!(third, Envelope::Event { .. }));
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (sender, receiver, worker) = channel_pair();
        drop(worker);

        assert_eq!(receiver.receive().await, Err(IpcError::ChannelClosed));
        let result = sender.post(OutboundMessage {
            correlation_id: CorrelationId::new(),
            request: WorkerRequest::new("foo"),
        });
        assert_eq!(result, Err(IpcError::ChannelClosed));
    }
}
