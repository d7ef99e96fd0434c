// src/core/tasks/tick.rs

//! The timer tick producer.
//!
//! Sleeps `tick_interval_ms` per iteration and bumps the tick and poll
//! counters, giving the watchdog a cheap liveness signal in the metrics
//! snapshot. Terminates on the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::core::metrics;
use crate::core::state::ServerState;

pub struct TickTask {
    state: Arc<ServerState>,
}

impl TickTask {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let interval = Duration::from_millis(self.state.config.tick_interval_ms.max(1));
        info!("Timer tick task started ({interval:?}).");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.state.with_core(|core| {
                        core.metrics.increment(metrics::TIMER_TICK_COUNT, 1);
                        core.metrics.increment(metrics::IO_POLL_COUNT, 1);
                    });
                }
                _ = shutdown_rx.recv() => {
                    info!("Timer tick task shutting down.");
                    return;
                }
            }
        }
    }
}
