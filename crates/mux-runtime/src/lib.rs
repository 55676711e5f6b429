//! # Mux Runtime Library
//!
//! Exposes the runtime host and the simulated worker for testing.
//! The main entry point is the `main.rs` binary.

#![allow(missing_docs)]

pub mod runtime;
pub mod worker;

pub use runtime::{MuxRuntime, TrafficReport};
pub use worker::SimulatedWorker;
