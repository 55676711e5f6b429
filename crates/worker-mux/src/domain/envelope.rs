//! Wire types exchanged with the worker.
//!
//! Outbound, a request is an object with a `kind` tag and arbitrary fields;
//! the dispatcher injects `correlationId` before it leaves. Inbound, every
//! message is an [`Envelope`] discriminated by its own `kind` tag:
//!
//! ```text
//! { "kind": "worker_event",    "event": { "subkind": "...", ... } }
//! { "kind": "worker_response", "correlationId": "...", "response": ..., "final": true }
//! { "kind": "worker_error",    "correlationId": "...", "error": "<serialized json>" }
//! ```

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{MuxError, MuxResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use worker_events::WorkerEvent;

/// Kind of the distinguished handshake request.
pub const HANDSHAKE_KIND: &str = "init";

/// Fields owned by the envelope; request params may not use them.
const RESERVED_FIELDS: [&str; 2] = ["kind", "correlationId"];

/// A logical request to the worker.
///
/// `kind` is used for diagnostics only; `params` are opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub kind: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl WorkerRequest {
    /// Create a request with no parameters.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
        }
    }

    /// The handshake request, carrying connection parameters.
    pub fn init(params: Map<String, Value>) -> Self {
        let mut request = Self::new(HANDSHAKE_KIND);
        for (key, value) in params {
            request = request.with_param(key, value);
        }
        request
    }

    /// Add a parameter. Reserved envelope fields are dropped.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if RESERVED_FIELDS.contains(&key.as_str()) {
            warn!(kind = %self.kind, field = %key, "Dropping reserved request field");
            return self;
        }
        self.params.insert(key, value);
        self
    }

    /// Build a request from any serializable value with a string `kind` field.
    pub fn from_serializable<T: Serialize>(value: &T) -> MuxResult<Self> {
        let Value::Object(mut map) =
            serde_json::to_value(value).map_err(|e| MuxError::Encode(e.to_string()))?
        else {
            return Err(MuxError::Encode("request must serialize to an object".into()));
        };

        let kind = match map.remove("kind") {
            Some(Value::String(kind)) => kind,
            _ => return Err(MuxError::Encode("request is missing a string `kind`".into())),
        };
        map.remove("correlationId");

        Ok(Self { kind, params: map })
    }

    /// True for the handshake kind.
    pub fn is_handshake(&self) -> bool {
        self.kind == HANDSHAKE_KIND
    }
}

/// A request with its correlation id attached, as handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub correlation_id: CorrelationId,
    #[serde(flatten)]
    pub request: WorkerRequest,
}

impl OutboundMessage {
    /// Serialize to the JSON object posted to the worker.
    pub fn to_value(&self) -> MuxResult<Value> {
        serde_json::to_value(self).map_err(|e| MuxError::Encode(e.to_string()))
    }
}

/// Inbound message from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Envelope {
    /// Server-push notification; never matched against the registry.
    #[serde(rename = "worker_event")]
    Event { event: WorkerEvent },

    /// Reply or streamed chunk for one request.
    #[serde(rename = "worker_response", rename_all = "camelCase")]
    Response {
        correlation_id: CorrelationId,
        response: Value,
        #[serde(rename = "final", default)]
        is_final: bool,
    },

    /// Failure for one request; `error` is serialized JSON.
    #[serde(rename = "worker_error", rename_all = "camelCase")]
    Error {
        correlation_id: CorrelationId,
        error: String,
    },
}

/// Why a raw inbound message could not be classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message with no data")]
    Empty,
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
    #[error("malformed message: {0}")]
    Malformed(String),
    /// A reply carrying an id this side could never have issued.
    #[error("foreign correlation id: {0}")]
    ForeignCorrelationId(String),
}

const ENVELOPE_KINDS: [&str; 3] = ["worker_event", "worker_response", "worker_error"];

impl Envelope {
    /// Classify a raw message delivered by the transport.
    pub fn decode(raw: &Value) -> Result<Self, DecodeError> {
        let map = match raw {
            Value::Null => return Err(DecodeError::Empty),
            Value::Object(map) if map.is_empty() => return Err(DecodeError::Empty),
            Value::Object(map) => map,
            _ => return Err(DecodeError::Malformed("message is not an object".into())),
        };
        let kind = map.get("kind").and_then(Value::as_str);

        if matches!(kind, Some("worker_response" | "worker_error")) {
            if let Some(Value::String(id)) = map.get("correlationId") {
                if CorrelationId::parse(id).is_err() {
                    return Err(DecodeError::ForeignCorrelationId(id.clone()));
                }
            }
        }

        match kind {
            Some(k) if ENVELOPE_KINDS.contains(&k) => Self::deserialize(raw)
                .map_err(|e| DecodeError::Malformed(e.to_string())),
            Some(k) => Err(DecodeError::UnknownKind(k.to_string())),
            None => Err(DecodeError::UnknownKind("<missing>".into())),
        }
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        let raw: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Self::decode(&raw)
    }

    /// Correlation id, for responses and errors.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Envelope::Event { .. } => None,
            Envelope::Response { correlation_id, .. } | Envelope::Error { correlation_id, .. } => {
                Some(*correlation_id)
            }
        }
    }
}
