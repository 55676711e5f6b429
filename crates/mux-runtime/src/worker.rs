//! # Simulated Worker
//!
//! An in-process stand-in for the background worker, speaking the same
//! envelope protocol over a [`WorkerEndpoint`]. It understands a handful of
//! request kinds:
//!
//! | Kind       | Behaviour                                                   |
//! |------------|-------------------------------------------------------------|
//! | `init`     | Handshake; replies `{ "principal": ... }`                   |
//! | `echo`     | Replies with the request parameters                         |
//! | `count`    | Streams `count` chunks `{ "index": i }`, then `{ "total": n }` |
//! | `markRead` | Emits `messages_read_from_server`, then replies `null`      |
//! | `fail`     | Fails with `{ "message": ... }`                             |
//! | `ignore`   | Never replies                                               |
//!
//! Anything else, and any request before the handshake, is failed.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use worker_events::{WorkerEvent, MESSAGES_READ_FROM_SERVER, USERS_LOADED};
use worker_mux::{IpcError, OutboundMessage, WorkerEndpoint, HANDSHAKE_KIND};

pub const ECHO_KIND: &str = "echo";
pub const COUNT_KIND: &str = "count";
pub const MARK_READ_KIND: &str = "markRead";
pub const FAIL_KIND: &str = "fail";
pub const IGNORE_KIND: &str = "ignore";

const DEFAULT_COUNT: u64 = 3;

/// Worker simulation driven by requests from one client.
pub struct SimulatedWorker {
    endpoint: WorkerEndpoint,
    principal: String,
    initialized: bool,
    handled: u64,
}

impl SimulatedWorker {
    pub fn new(endpoint: WorkerEndpoint) -> Self {
        Self {
            endpoint,
            principal: "2vxsx-fae".to_string(),
            initialized: false,
            handled: 0,
        }
    }

    /// Serve requests until the client side goes away.
    ///
    /// Returns the number of requests handled. Dropping the worker on return
    /// closes the reply direction, which the client observes as channel close.
    pub async fn run(mut self) -> u64 {
        info!(principal = %self.principal, "Simulated worker started");

        while let Some(message) = self.endpoint.recv().await {
            self.handled += 1;
            if let Err(e) = self.handle(message) {
                warn!(error = %e, "Reply channel closed, stopping worker");
                break;
            }
        }

        info!(handled = self.handled, "Simulated worker stopped");
        self.handled
    }

    fn handle(&mut self, message: OutboundMessage) -> Result<(), IpcError> {
        let OutboundMessage {
            correlation_id,
            request,
        } = message;
        debug!(%correlation_id, kind = %request.kind, "Worker received request");

        if request.kind == HANDSHAKE_KIND {
            self.initialized = true;
            self.endpoint.emit_event(
                WorkerEvent::new(USERS_LOADED).with_field("principal", json!(self.principal)),
            )?;
            return self
                .endpoint
                .respond(correlation_id, json!({ "principal": self.principal }));
        }

        if !self.initialized {
            return self
                .endpoint
                .fail(correlation_id, &error_payload("worker not initialized"));
        }

        match request.kind.as_str() {
            ECHO_KIND => self
                .endpoint
                .respond(correlation_id, Value::Object(request.params)),
            COUNT_KIND => {
                let total = request
                    .params
                    .get("count")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_COUNT);
                for index in 0..total {
                    self.endpoint
                        .respond_chunk(correlation_id, json!({ "index": index }), false)?;
                }
                self.endpoint
                    .respond(correlation_id, json!({ "total": total }))
            }
            MARK_READ_KIND => {
                let chat_id = request.params.get("chatId").cloned().unwrap_or(Value::Null);
                self.endpoint.emit_event(
                    WorkerEvent::new(MESSAGES_READ_FROM_SERVER).with_field("chatId", chat_id),
                )?;
                self.endpoint.respond(correlation_id, Value::Null)
            }
            FAIL_KIND => {
                let message = request
                    .params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure");
                self.endpoint.fail(correlation_id, &error_payload(message))
            }
            IGNORE_KIND => Ok(()),
            other => self.endpoint.fail(
                correlation_id,
                &error_payload(&format!("unknown request kind: {other}")),
            ),
        }
    }
}

fn error_payload(message: &str) -> Value {
    let mut payload = Map::new();
    payload.insert("message".into(), json!(message));
    Value::Object(payload)
}
