//! Worker client - the public entry point of the multiplexer.
//!
//! Owns one multiplexer instance: registry, connection gate and event
//! fan-out are per client, never global.

use crate::domain::config::{ConfigError, MuxConfig};
use crate::domain::connection::ConnectionState;
use crate::domain::correlation::{CorrelationId, IdGenerator, RandomIdGenerator};
use crate::domain::envelope::WorkerRequest;
use crate::domain::error::MuxResult;
use crate::domain::pending::StatsSnapshot;
use crate::ipc::channel::{WorkerReceiver, WorkerSender};
use crate::ipc::dispatcher::OutboundDispatcher;
use crate::ipc::response::{ResponseFuture, ResponseStream};
use crate::ipc::router::InboundRouter;
use crate::ipc::state::SharedState;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use worker_events::{EventFilter, EventPublisher, EventStream, Subscription};

/// Client for one worker connection
pub struct WorkerClient {
    state: Arc<SharedState>,
    dispatcher: OutboundDispatcher,
}

impl WorkerClient {
    /// Create a new client posting requests through `sender`.
    pub fn new(config: MuxConfig, sender: Arc<dyn WorkerSender>) -> Result<Self, ConfigError> {
        Self::with_id_generator(config, sender, Arc::new(RandomIdGenerator))
    }

    /// Create a client with a custom correlation id source.
    pub fn with_id_generator(
        config: MuxConfig,
        sender: Arc<dyn WorkerSender>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let state = SharedState::new(config);
        let dispatcher = OutboundDispatcher::new(Arc::clone(&state), sender, ids);

        Ok(Self { state, dispatcher })
    }

    /// Router handle sharing this client's state. Feed it every inbound
    /// message, or use [`spawn_router`](Self::spawn_router).
    pub fn router(&self) -> InboundRouter {
        let publisher: Arc<dyn EventPublisher> = self.state.events.clone();
        InboundRouter::new(Arc::clone(&self.state), publisher)
    }

    /// Run the router on the Tokio runtime until the channel closes.
    pub fn spawn_router(&self, receiver: Arc<dyn WorkerReceiver>) -> JoinHandle<()> {
        tokio::spawn(self.router().run(receiver))
    }

    /// Perform the handshake.
    ///
    /// Moves the gate to `Connecting` and sends the `init` request. The gate
    /// moves to `Connected` when the worker's final reply is routed. A
    /// failed handshake leaves the gate in `Connecting` and may be retried.
    pub async fn connect_to_worker(&self, params: Map<String, Value>) -> MuxResult<Value> {
        self.state.gate.begin_connecting()?;
        info!("Connecting to worker");
        self.dispatcher.dispatch_handshake(params)?.await
    }

    /// Send a single-result request with the default timeout.
    ///
    /// Fails immediately if the handshake has not completed.
    pub fn send_request(&self, request: WorkerRequest) -> MuxResult<ResponseFuture> {
        self.dispatcher.dispatch_unary(request, None)
    }

    /// Send a single-result request with an explicit timeout.
    pub fn send_request_with_timeout(
        &self,
        request: WorkerRequest,
        timeout: Duration,
    ) -> MuxResult<ResponseFuture> {
        self.dispatcher.dispatch_unary(request, Some(timeout))
    }

    /// Send a streaming request with the default timeout.
    pub fn send_stream_request(&self, request: WorkerRequest) -> MuxResult<ResponseStream> {
        self.dispatcher.dispatch_stream(request, None)
    }

    /// Send a streaming request with an explicit timeout.
    pub fn send_stream_request_with_timeout(
        &self,
        request: WorkerRequest,
        timeout: Duration,
    ) -> MuxResult<ResponseStream> {
        self.dispatcher.dispatch_stream(request, Some(timeout))
    }

    /// Send a request, await its final reply and deserialize it.
    pub async fn call<T: DeserializeOwned>(&self, request: WorkerRequest) -> MuxResult<T> {
        self.send_request(request)?.into_typed().await
    }

    /// Subscribe to worker events.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.state.events.subscribe(filter)
    }

    /// Worker events as a `Stream`.
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        self.state.events.event_stream(filter)
    }

    /// Wait until the handshake has completed.
    pub async fn wait_connected(&self) {
        self.state.gate.wait_connected().await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.gate.state()
    }

    pub fn config(&self) -> &MuxConfig {
        &self.state.config
    }

    /// Get pending request count
    pub fn pending_count(&self) -> usize {
        self.state.inflight.lock().pending.len()
    }

    pub fn unresolved_count(&self) -> usize {
        self.state.inflight.lock().unresolved.len()
    }

    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.state.inflight.lock().pending.contains(correlation_id)
    }

    pub fn is_unresolved(&self, correlation_id: &CorrelationId) -> bool {
        self.state.inflight.lock().unresolved.contains(correlation_id)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.state.stats.snapshot()
    }

    pub fn events_published(&self) -> u64 {
        self.state.events.events_published()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::MuxError;
    use crate::ipc::channel::memory::channel_pair;
    use serde_json::json;

    #[test]
    fn test_invalid_config_rejected() {
        let (sender, _receiver, _worker) = channel_pair();
        let config = MuxConfig::default().with_default_timeout(Duration::ZERO);
        assert!(WorkerClient::new(config, Arc::new(sender)).is_err());
    }

    #[tokio::test]
    async fn test_connect_then_request() {
        let (sender, receiver, mut worker) = channel_pair();
        let client = WorkerClient::new(MuxConfig::default(), Arc::new(sender)).unwrap();
        client.spawn_router(Arc::new(receiver));

        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        let worker_task = tokio::spawn(async move {
            let init = worker.recv().await.unwrap();
            assert_eq!(init.request.kind, "init");
            worker.respond(init.correlation_id, json!({ "ok": true })).unwrap();

            let request = worker.recv().await.unwrap();
            worker
                .respond(request.correlation_id, json!({ "name": "alice" }))
                .unwrap();
            worker
        });

        let mut params = Map::new();
        params.insert("icUrl".into(), json!("http://localhost:4943"));
        let reply = client.connect_to_worker(params).await.unwrap();
        assert_eq!(reply["ok"], true);
        client.wait_connected().await;
        assert_eq!(client.connection_state(), ConnectionState::Connected);

        #[derive(serde::Deserialize)]
        struct User {
            name: String,
        }
        let user: User = client.call(WorkerRequest::new("getUser")).await.unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(client.pending_count(), 0);

        assert_eq!(
            client.connect_to_worker(Map::new()).await,
            Err(MuxError::AlreadyConnected)
        );
        let _worker = worker_task.await.unwrap();
    }
}
