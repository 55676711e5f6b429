// Allow missing docs for internal items in development
#![allow(missing_docs)]

//! Worker Mux - correlated request/response multiplexing over one worker channel.
//!
//! A client talks to a single long-lived worker through an asynchronous,
//! message-oriented duplex channel. Many logical requests share that channel;
//! each carries a correlation id so that replies, streamed chunks and errors
//! find their way back to the right caller, while server-push events go to
//! subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          WorkerClient                             │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  send_request / send_stream_request / connect_to_worker          │
//! │         │                                                         │
//! │  ┌──────┴──────────────┐   Connection Gate                        │
//! │  │ Outbound Dispatcher │◄─ disconnected → connecting → connected  │
//! │  └──────┬──────────────┘                                          │
//! │         │ insert            ┌────────────────────┐                │
//! │  ┌──────┴──────────────┐    │ Timeout Supervisor │                │
//! │  │ Correlation Registry│◄───┤  (one per call)    │                │
//! │  └──────┬──────────────┘    └────────────────────┘                │
//! │         │ resolve / reject                                        │
//! │  ┌──────┴──────────────┐         ┌───────────────┐                │
//! │  │   Inbound Router    │──event─►│ Event Fan-out │                │
//! │  └──────┬──────────────┘         └───────────────┘                │
//! └─────────┼─────────────────────────────────────────────────────────┘
//!           │
//!      worker channel
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use worker_mux::{channel_pair, MuxConfig, WorkerClient, WorkerRequest};
//!
//! let (sender, receiver, worker) = channel_pair();
//! let client = WorkerClient::new(MuxConfig::default(), Arc::new(sender))?;
//! client.spawn_router(Arc::new(receiver));
//! client.connect_to_worker(params).await?;
//!
//! let chats = client.send_request(WorkerRequest::new("getChats"))?.await?;
//! ```
//!
//! # Guarantees
//!
//! - Every dispatched request is resolved or rejected exactly once
//! - Non-final chunks never remove a call from the registry
//! - Requests before the handshake fail immediately, without touching the channel
//! - A timeout never fires before its window, and never after a terminal reply

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod domain;
pub mod ipc;
pub mod service;

// Re-exports for public API
pub use domain::config::{ConfigError, MuxConfig, DEFAULT_WORKER_TIMEOUT};
pub use domain::connection::ConnectionState;
pub use domain::correlation::{CorrelationId, IdGenerator, RandomIdGenerator};
pub use domain::envelope::{Envelope, OutboundMessage, WorkerRequest, HANDSHAKE_KIND};
pub use domain::error::{MuxError, MuxResult, RemoteError};
pub use domain::pending::StatsSnapshot;
pub use ipc::{
    channel_pair, ChannelReceiver, ChannelSender, InboundRouter, IpcError, ResponseFuture,
    ResponseStream, WorkerEndpoint, WorkerReceiver, WorkerSender,
};
pub use service::WorkerClient;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
