//! # Mux Telemetry
//!
//! Observability for the worker multiplexer.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, plain or JSON output
//! - **Metrics**: Prometheus counters and gauges mirrored from client statistics
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mux_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     // Logs and metrics are now being collected
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MUX_SERVICE_NAME` | `worker-mux` | Service name in logs |
//! | `MUX_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter directive |
//! | `MUX_JSON_LOGS` | `false` | JSON formatted logs |
//! | `MUX_LOG_SOURCE` | `false` | Include file and line |

#![allow(missing_docs)]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};
pub use metrics::{gather_metrics, register_metrics, StatsMirror};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    // Initialize metrics first so nothing is missed once logging reports ready
    register_metrics()?;
    init_logging(config)
}
