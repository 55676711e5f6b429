//! Timeout supervisor.
//!
//! Every dispatched call gets one scheduled deadline. If the deadline fires
//! while the call is still registered, the call is removed, an unresolved
//! record is kept for late-reply diagnostics, and the caller is rejected
//! with a timeout error. If the call is already gone, a reply won the race
//! and the deadline does nothing.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::MuxError;
use crate::domain::pending::PendingStats;
use crate::domain::unresolved::UnresolvedRecord;
use crate::ipc::state::SharedState;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{trace, warn};

/// Handle to a scheduled deadline. Cancelling is explicit; dropping the
/// handle leaves the deadline armed.
pub struct TimeoutHandle {
    abort: AbortHandle,
}

impl TimeoutHandle {
    /// Cancel the deadline. No-op if it already fired.
    pub fn cancel(self) {
        self.abort.abort();
    }
}

impl fmt::Debug for TimeoutHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutHandle")
            .field("finished", &self.abort.is_finished())
            .finish()
    }
}

/// Schedules deadlines against the shared state.
///
/// Holds a weak reference so outstanding deadlines do not keep a dropped
/// client alive.
#[derive(Clone)]
pub(crate) struct TimeoutSupervisor {
    state: Weak<SharedState>,
}

impl TimeoutSupervisor {
    pub(crate) fn new(state: &Arc<SharedState>) -> Self {
        Self {
            state: Arc::downgrade(state),
        }
    }

    /// Schedule `expire(correlation_id)` after `timeout`.
    ///
    /// Must be called inside a Tokio runtime.
    pub(crate) fn arm(&self, correlation_id: CorrelationId, timeout: Duration) -> TimeoutHandle {
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(state) = state.upgrade() {
                expire(&state, correlation_id);
            }
        });
        TimeoutHandle {
            abort: task.abort_handle(),
        }
    }
}

fn expire(state: &SharedState, correlation_id: CorrelationId) {
    let call = {
        let mut inflight = state.inflight.lock();
        let Some(call) = inflight.pending.remove(&correlation_id) else {
            trace!(correlation_id = %correlation_id, "Deadline fired after resolution");
            return;
        };
        inflight.unresolved.record(
            correlation_id,
            UnresolvedRecord {
                kind: call.kind.clone(),
                sent_at: call.sent_at,
            },
        );
        call
    };

    PendingStats::incr(&state.stats.total_timeouts);
    let timeout_ms = u64::try_from(call.timeout.as_millis()).unwrap_or(u64::MAX);
    warn!(
        correlation_id = %correlation_id,
        kind = %call.kind,
        timeout_ms,
        "Request timed out"
    );

    let error = MuxError::Timeout {
        kind: call.kind.clone(),
        correlation_id,
        timeout_ms,
    };
    call.expire(error);
}
