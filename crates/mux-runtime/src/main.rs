//! # Worker Mux Runtime
//!
//! Hosts a multiplexer client against an in-process simulated worker.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logging + metrics)
//! 2. Load and validate multiplexer configuration
//! 3. Create the runtime (client, router, worker)
//! 4. Perform the handshake
//! 5. Drive sample traffic and report metrics
//! 6. Shut down cleanly

use anyhow::{Context, Result};
use serde_json::{json, Map};
use tracing::{debug, error, info};

use mux_runtime::MuxRuntime;
use mux_telemetry::{gather_metrics, init_telemetry, TelemetryConfig};
use worker_mux::MuxConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(&TelemetryConfig::from_env()).context("Failed to initialize telemetry")?;

    let config = MuxConfig::from_env();
    config
        .validate()
        .context("Invalid multiplexer configuration")?;

    let runtime = MuxRuntime::new(config)?;
    let events = runtime.spawn_event_logger();

    let mut params = Map::new();
    params.insert("clientVersion".into(), json!(worker_mux::VERSION));
    runtime.start(params).await?;

    if let Err(e) = runtime.run_sample_traffic().await {
        error!(error = %e, "Sample traffic failed");
    }

    runtime.observe_metrics();
    match gather_metrics() {
        Ok(text) => debug!(metrics = %text, "Metrics snapshot"),
        Err(e) => error!(error = %e, "Failed to gather metrics"),
    }

    let handled = runtime.shutdown().await?;
    let logged = events.await.context("Event logger panicked")?;
    info!(handled, events = logged, "Done");

    Ok(())
}
