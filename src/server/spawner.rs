// src/server/spawner.rs

//! Spawns the host's long-running background tasks.

use tracing::info;

use super::context::ServerContext;
use super::udp_loop::UdpLoop;
use crate::core::tasks::tick::TickTask;

/// Spawns the tick producer and the UDP receiver into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) {
    let tick = TickTask::new(ctx.state.clone());
    let shutdown_rx_tick = ctx.state.subscribe_shutdown();
    ctx.background_tasks.spawn(async move {
        tick.run(shutdown_rx_tick).await;
    });

    let udp = UdpLoop::new(ctx.state.clone(), ctx.udp_socket.clone());
    let shutdown_rx_udp = ctx.state.subscribe_shutdown();
    ctx.background_tasks.spawn(async move {
        udp.run(shutdown_rx_udp).await;
    });

    info!("All background tasks have been spawned.");
}
