//! Multiplexer error types.
//!
//! Every caller-visible failure travels through the same `Result` channel as
//! a genuine remote error, so callers have one failure path regardless of
//! whether the worker, the clock, or the connection gate produced it.

use crate::domain::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Failure reported by the worker for one correlation id.
///
/// The worker sends the error as a serialized JSON string; this is the
/// parsed form. A string that is not valid JSON is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteError {
    payload: Value,
}

impl RemoteError {
    /// Wrap an already-deserialized error payload.
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// Parse the serialized error carried by a `worker_error` envelope.
    pub fn from_serialized(serialized: &str) -> Self {
        let payload = serde_json::from_str(serialized)
            .unwrap_or_else(|_| Value::String(serialized.to_string()));
        Self { payload }
    }

    /// The raw error payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Human-readable message, if the payload carries one.
    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map.get("message").and_then(Value::as_str),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => f.write_str(message),
            None => write!(f, "{}", self.payload),
        }
    }
}

/// Multiplexer errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MuxError {
    /// A non-handshake request was dispatched before the handshake completed.
    #[error("the client is not yet connected to the worker")]
    NotConnected,

    /// `connect_to_worker` was called after the gate reached `connected`.
    #[error("the client is already connected to the worker")]
    AlreadyConnected,

    /// No terminal reply arrived within the configured window.
    #[error(
        "request of kind {kind} with correlation id {correlation_id} did not receive a response within the {timeout_ms}ms timeout"
    )]
    Timeout {
        kind: String,
        correlation_id: CorrelationId,
        timeout_ms: u64,
    },

    /// The worker reported a failure for this request.
    #[error("worker error: {0}")]
    Remote(RemoteError),

    /// The transport refused the outgoing message.
    #[error("transport error: {0}")]
    Transport(String),

    /// The inbound side of the channel closed before a terminal reply.
    #[error("worker channel closed")]
    ChannelClosed,

    /// The id generator produced an id that is already in flight.
    #[error("correlation id {0} is already in flight")]
    DuplicateCorrelationId(CorrelationId),

    /// The request could not be turned into a wire message.
    #[error("encode error: {0}")]
    Encode(String),

    /// A reply payload could not be turned into the caller's type.
    #[error("decode error: {0}")]
    Decode(String),
}

impl MuxError {
    /// True for the timeout variant.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MuxError::Timeout { .. })
    }

    /// The remote error, if the worker produced this failure.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            MuxError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for multiplexer operations
pub type MuxResult<T> = Result<T, MuxError>;
