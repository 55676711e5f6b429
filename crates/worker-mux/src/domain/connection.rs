//! Connection gate: tracks whether the worker handshake has completed.
//!
//! ```text
//! Disconnected ──connect_to_worker()──► Connecting ──handshake final──► Connected
//! ```
//!
//! Transitions only move forward. There is no teardown: the worker lives as
//! long as the client.

use crate::domain::error::{MuxError, MuxResult};
use std::fmt;
use tokio::sync::watch;
use tracing::info;

/// Process-wide connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Forward-only connection state machine.
pub struct ConnectionGate {
    state: watch::Sender<ConnectionState>,
}

impl ConnectionGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { state }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Move to `Connecting`.
    ///
    /// Re-entering `Connecting` is allowed so a failed handshake can be
    /// retried; once `Connected`, this fails with `AlreadyConnected`.
    pub fn begin_connecting(&self) -> MuxResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| match *state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Connecting => false,
            ConnectionState::Connected => {
                result = Err(MuxError::AlreadyConnected);
                false
            }
        });
        result
    }

    /// Move to `Connected`. Called when the handshake's final reply is routed.
    pub fn mark_connected(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                false
            } else {
                *state = ConnectionState::Connected;
                true
            }
        });
        if changed {
            info!("Connected to worker");
        }
    }

    /// Admit a dispatch. The handshake always passes; everything else needs
    /// `Connected`.
    pub fn check(&self, is_handshake: bool) -> MuxResult<()> {
        if is_handshake || self.is_connected() {
            Ok(())
        } else {
            Err(MuxError::NotConnected)
        }
    }

    /// Wait until the gate reaches `Connected`.
    pub async fn wait_connected(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state == ConnectionState::Connected).await;
    }
}

impl Default for ConnectionGate {
    fn default() -> Self {
        Self::new()
    }
}
