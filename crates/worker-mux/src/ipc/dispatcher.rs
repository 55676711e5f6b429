//! Outbound dispatcher.
//!
//! Turns a request into a registered pending call plus a message on the
//! channel:
//!
//! 1. Check the connection gate (the handshake bypasses it)
//! 2. Generate a correlation id
//! 3. Arm the deadline and register the call, under one lock
//! 4. Post the message; the transport does not acknowledge
//!
//! Registration happens before the post so a reply can never arrive for an
//! id the router does not know yet.

use crate::domain::correlation::{CorrelationId, IdGenerator};
use crate::domain::envelope::{OutboundMessage, WorkerRequest};
use crate::domain::error::{MuxError, MuxResult};
use crate::domain::pending::{PendingCall, PendingStats, ResponseSink};
use crate::ipc::channel::WorkerSender;
use crate::ipc::response::{ResponseFuture, ResponseStream};
use crate::ipc::state::SharedState;
use crate::ipc::timeout::TimeoutSupervisor;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Sends requests to the worker on behalf of callers.
#[derive(Clone)]
pub struct OutboundDispatcher {
    state: Arc<SharedState>,
    sender: Arc<dyn WorkerSender>,
    ids: Arc<dyn IdGenerator>,
    timeouts: TimeoutSupervisor,
}

impl OutboundDispatcher {
    pub(crate) fn new(
        state: Arc<SharedState>,
        sender: Arc<dyn WorkerSender>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let timeouts = TimeoutSupervisor::new(&state);
        Self {
            state,
            sender,
            ids,
            timeouts,
        }
    }

    /// Dispatch a single-result request.
    ///
    /// `timeout` of `None` uses the configured default.
    pub fn dispatch_unary(
        &self,
        request: WorkerRequest,
        timeout: Option<Duration>,
    ) -> MuxResult<ResponseFuture> {
        let (tx, rx) = oneshot::channel();
        let correlation_id = self.dispatch(request, false, timeout, ResponseSink::Unary(tx))?;
        Ok(ResponseFuture::new(correlation_id, rx))
    }

    /// Dispatch a streaming request whose chunks are all yielded.
    pub fn dispatch_stream(
        &self,
        request: WorkerRequest,
        timeout: Option<Duration>,
    ) -> MuxResult<ResponseStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlation_id = self.dispatch(request, false, timeout, ResponseSink::Stream(tx))?;
        Ok(ResponseStream::new(correlation_id, rx))
    }

    /// Dispatch the connection handshake. The only request that passes the
    /// gate before it reaches `Connected`.
    pub(crate) fn dispatch_handshake(
        &self,
        params: Map<String, Value>,
    ) -> MuxResult<ResponseFuture> {
        let (tx, rx) = oneshot::channel();
        let request = WorkerRequest::init(params);
        let correlation_id = self.dispatch(request, true, None, ResponseSink::Unary(tx))?;
        Ok(ResponseFuture::new(correlation_id, rx))
    }

    fn dispatch(
        &self,
        request: WorkerRequest,
        handshake: bool,
        timeout: Option<Duration>,
        sink: ResponseSink,
    ) -> MuxResult<CorrelationId> {
        if let Err(e) = self.state.gate.check(handshake) {
            PendingStats::incr(&self.state.stats.total_not_connected);
            debug!(
                kind = %request.kind,
                state = %self.state.gate.state(),
                "Refusing request before handshake"
            );
            return Err(e);
        }

        let timeout = timeout.unwrap_or(self.state.config.default_timeout);
        let correlation_id = self.ids.next();

        {
            let mut inflight = self.state.inflight.lock();
            let deadline = self.timeouts.arm(correlation_id, timeout);
            let call = PendingCall::new(
                correlation_id,
                request.kind.clone(),
                timeout,
                handshake,
                sink,
            )
            .with_deadline(deadline);

            if let Err(e) = inflight.pending.insert(call) {
                error!(
                    correlation_id = %correlation_id,
                    kind = %request.kind,
                    "Correlation id already in flight"
                );
                return Err(e.into());
            }
        }
        PendingStats::incr(&self.state.stats.total_registered);

        let kind = request.kind.clone();
        let message = OutboundMessage {
            correlation_id,
            request,
        };

        if let Err(e) = self.sender.post(message) {
            warn!(
                correlation_id = %correlation_id,
                kind = %kind,
                error = %e,
                "Failed to post request to worker"
            );
            let error = MuxError::Transport(e.to_string());
            // A zero timeout may already have claimed the entry.
            let call = self.state.inflight.lock().pending.remove(&correlation_id);
            if let Some(call) = call {
                call.complete(Err(error.clone()));
            }
            return Err(error);
        }

        debug!(
            correlation_id = %correlation_id,
            kind = %kind,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Dispatched request"
        );

        Ok(correlation_id)
    }
}
