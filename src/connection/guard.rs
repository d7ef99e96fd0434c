// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection accounting.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::core::metrics;
use crate::core::state::ServerState;

/// Counts a connection in on creation and out on drop, so the active count
/// and its high-water mark stay correct on every exit path of the handler.
pub struct ConnectionGuard {
    state: Arc<ServerState>,
    addr: SocketAddr,
}

impl ConnectionGuard {
    pub(crate) fn new(state: Arc<ServerState>, addr: SocketAddr) -> Self {
        state.with_core(|core| {
            core.metrics.increment(metrics::ACCEPTED_CONNECTIONS, 1);
            core.metrics.increment(metrics::TCP_ACCEPT_COUNT, 1);
            core.metrics.update_active_connections(1);
        });
        Self { state, addr }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        debug!("Connection from {} closed, releasing accounting.", self.addr);
        self.state
            .with_core(|core| core.metrics.update_active_connections(-1));
    }
}
