//! # Mux Runtime
//!
//! Owns one [`WorkerClient`] wired to a [`SimulatedWorker`] over an
//! in-process channel, plus the background tasks that keep it alive.
//!
//! ## Startup Sequence
//!
//! 1. Create the channel pair and the client
//! 2. Spawn the inbound router and the worker
//! 3. Perform the handshake
//! 4. Serve requests until shutdown

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mux_telemetry::StatsMirror;
use worker_events::EventFilter;
use worker_mux::{channel_pair, MuxConfig, MuxError, WorkerClient, WorkerRequest};

use crate::worker::{
    SimulatedWorker, COUNT_KIND, ECHO_KIND, FAIL_KIND, IGNORE_KIND, MARK_READ_KIND,
};

/// Timeout used for the deliberately unanswered sample request.
const SAMPLE_TIMEOUT: Duration = Duration::from_millis(50);

/// Outcome of [`MuxRuntime::run_sample_traffic`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficReport {
    /// Single-result requests that resolved.
    pub unary_replies: usize,
    /// Chunks received across all streaming requests.
    pub stream_chunks: usize,
    /// Requests the worker rejected.
    pub remote_errors: usize,
    /// Requests that timed out.
    pub timeouts: usize,
}

/// Runtime hosting one client and its worker.
pub struct MuxRuntime {
    client: WorkerClient,
    router: JoinHandle<()>,
    worker: JoinHandle<u64>,
    metrics: StatsMirror,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MuxRuntime {
    /// Create the runtime. Must be called inside a Tokio runtime.
    pub fn new(config: MuxConfig) -> Result<Self> {
        let (sender, receiver, endpoint) = channel_pair();

        let client = WorkerClient::new(config, Arc::new(sender))
            .context("Invalid multiplexer configuration")?;
        let router = client.spawn_router(Arc::new(receiver));
        let worker = tokio::spawn(SimulatedWorker::new(endpoint).run());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let timeout_ms =
            u64::try_from(client.config().default_timeout.as_millis()).unwrap_or(u64::MAX);
        info!(timeout_ms, "Mux runtime created");

        Ok(Self {
            client,
            router,
            worker,
            metrics: StatsMirror::new(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn client(&self) -> &WorkerClient {
        &self.client
    }

    /// Perform the handshake and return the worker's reply.
    pub async fn start(&self, params: Map<String, Value>) -> Result<Value> {
        info!("===========================================");
        info!("  Worker Mux Runtime v{}", worker_mux::VERSION);
        info!("===========================================");

        let hello = self
            .client
            .connect_to_worker(params)
            .await
            .context("Handshake with worker failed")?;

        info!(reply = %hello, "Connected to worker");
        Ok(hello)
    }

    /// Log every worker event until shutdown. Returns the number logged.
    pub fn spawn_event_logger(&self) -> JoinHandle<usize> {
        let mut subscription = self.client.subscribe(EventFilter::all());
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            let mut logged = 0;
            loop {
                tokio::select! {
                    event = subscription.recv() => match event {
                        Some(event) => {
                            logged += 1;
                            info!(subkind = %event.subkind, "Worker event");
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            logged
        })
    }

    /// Drive a representative mix of requests through the client.
    pub async fn run_sample_traffic(&self) -> Result<TrafficReport> {
        let mut report = TrafficReport::default();

        // Unary, with a typed reply
        let echoed: Value = self
            .client
            .call(WorkerRequest::new(ECHO_KIND).with_param("text", json!("hello")))
            .await
            .context("Echo request failed")?;
        info!(reply = %echoed, "Echo reply");
        report.unary_replies += 1;

        // Interleaved: two unary requests and a stream share the channel
        let first = self
            .client
            .send_request(WorkerRequest::new(ECHO_KIND).with_param("n", json!(1)))?;
        let stream = self
            .client
            .send_stream_request(WorkerRequest::new(COUNT_KIND).with_param("count", json!(5)))?;
        let second = self
            .client
            .send_request(WorkerRequest::new(ECHO_KIND).with_param("n", json!(2)))?;

        let (first, chunks, second) = tokio::join!(first, stream.collect_all(), second);
        first?;
        second?;
        report.unary_replies += 2;
        report.stream_chunks += chunks?.len();

        // Server-push event alongside a reply
        self.client
            .send_request(WorkerRequest::new(MARK_READ_KIND).with_param("chatId", json!("chat-1")))?
            .await?;
        report.unary_replies += 1;

        // Worker-side failure
        let failure = self
            .client
            .send_request(WorkerRequest::new(FAIL_KIND).with_param("message", json!("quota exceeded")))?
            .await;
        match failure {
            Err(MuxError::Remote(error)) => {
                warn!(error = %error, "Worker rejected request");
                report.remote_errors += 1;
            }
            other => anyhow::bail!("expected a worker error, got {other:?}"),
        }

        // No reply at all
        let silent = self
            .client
            .send_request_with_timeout(WorkerRequest::new(IGNORE_KIND), SAMPLE_TIMEOUT)?
            .await;
        match silent {
            Err(e) if e.is_timeout() => report.timeouts += 1,
            other => anyhow::bail!("expected a timeout, got {other:?}"),
        }

        info!(
            unary = report.unary_replies,
            chunks = report.stream_chunks,
            remote_errors = report.remote_errors,
            timeouts = report.timeouts,
            "Sample traffic complete"
        );
        Ok(report)
    }

    /// Copy the client's statistics into the Prometheus metrics.
    pub fn observe_metrics(&self) {
        self.metrics.observe_client(&self.client);
    }

    /// Stop background tasks. Returns the number of requests the worker handled.
    pub async fn shutdown(self) -> Result<u64> {
        info!("Shutting down mux runtime");
        let _ = self.shutdown_tx.send(true);

        // Dropping the client closes the request direction; the worker then
        // exits and closes the reply direction, which ends the router.
        drop(self.client);
        let handled = self.worker.await.context("Worker task panicked")?;
        self.router.await.context("Router task panicked")?;

        info!(handled, "Mux runtime stopped");
        Ok(handled)
    }
}
