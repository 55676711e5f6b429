//! IPC layer: the asynchronous side of the multiplexer.
//!
//! The dispatcher registers calls and posts requests, the router consumes
//! the inbound channel, and the timeout supervisor expires calls nobody
//! answered. All three share one lock over the registry.

pub mod channel;
pub mod dispatcher;
pub mod response;
pub mod router;
pub(crate) mod state;
pub mod timeout;

pub use channel::memory::{channel_pair, ChannelReceiver, ChannelSender, WorkerEndpoint};
pub use channel::{IpcError, WorkerReceiver, WorkerSender};
pub use dispatcher::OutboundDispatcher;
pub use response::{ResponseFuture, ResponseStream};
pub use router::InboundRouter;
pub use timeout::TimeoutHandle;
