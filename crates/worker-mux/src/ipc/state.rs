//! State shared by the dispatcher, the router and the timeout supervisor.

use crate::domain::config::MuxConfig;
use crate::domain::connection::ConnectionGate;
use crate::domain::pending::{PendingRegistry, PendingStats};
use crate::domain::unresolved::UnresolvedStore;
use parking_lot::Mutex;
use std::sync::Arc;
use worker_events::EventFanout;

/// Everything guarded by the in-flight lock.
///
/// Registry and unresolved store move together: a timeout removes from one
/// and records into the other in the same critical section.
pub(crate) struct Inflight {
    pub(crate) pending: PendingRegistry,
    pub(crate) unresolved: UnresolvedStore,
}

pub(crate) struct SharedState {
    pub(crate) inflight: Mutex<Inflight>,
    pub(crate) gate: ConnectionGate,
    pub(crate) stats: PendingStats,
    pub(crate) events: Arc<EventFanout>,
    pub(crate) config: MuxConfig,
}

impl SharedState {
    pub(crate) fn new(config: MuxConfig) -> Arc<Self> {
        Arc::new(Self {
            inflight: Mutex::new(Inflight {
                pending: PendingRegistry::new(),
                unresolved: UnresolvedStore::new(
                    config.max_unresolved,
                    config.unresolved_retention,
                ),
            }),
            gate: ConnectionGate::new(),
            stats: PendingStats::default(),
            events: Arc::new(EventFanout::new()),
            config,
        })
    }
}
