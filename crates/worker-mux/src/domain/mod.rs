//! Domain types for the worker multiplexer.
//!
//! This module contains the core types, configuration, and error handling.
//! Async infrastructure (dispatch, routing, timeouts) is in the ipc layer.

pub mod config;
pub mod connection;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod pending;
pub mod unresolved;

// Re-exports for convenience
pub use config::{ConfigError, MuxConfig, DEFAULT_WORKER_TIMEOUT};
pub use connection::{ConnectionGate, ConnectionState};
pub use correlation::{CorrelationId, IdGenerator, RandomIdGenerator};
pub use envelope::{DecodeError, Envelope, OutboundMessage, WorkerRequest, HANDSHAKE_KIND};
pub use error::{MuxError, MuxResult, RemoteError};
pub use pending::{PendingCall, PendingRegistry, PendingStats, RegistryError, ResponseSink, StatsSnapshot};
pub use unresolved::{UnresolvedRecord, UnresolvedStore};
