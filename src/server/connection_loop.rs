// src/server/connection_loop.rs

//! Contains the main loop for accepting connections and the graceful
//! shutdown sequence.

use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::context::ServerContext;
use crate::connection::ConnectionHandler;

// Platform-specific signal handling imports
#[cfg(windows)]
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Best-effort wait up to this long for in-flight work during shutdown;
/// stragglers are abandoned.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Waits for a shutdown signal based on the operating system.
/// On Unix, it listens for SIGINT and SIGTERM. On Windows, Ctrl+C.
/// Installation is best-effort: where signal hooks are unavailable the
/// future stays pending and the host stops through `__STOP__` instead.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        let sigint = signal(SignalKind::interrupt());
        let sigterm = signal(SignalKind::terminate());
        match (sigint, sigterm) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
                    _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
                }
            }
            _ => {
                warn!("Signal hooks unavailable; stop via the __STOP__ command.");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(windows)]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, initiating graceful shutdown."),
            Err(_) => {
                warn!("Signal hooks unavailable; stop via the __STOP__ command.");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// The main loop: accept connections until a stop is requested, then run the
/// graceful shutdown sequence.
pub async fn run(mut ctx: ServerContext) {
    let mut shutdown_rx = ctx.state.subscribe_shutdown();
    let mut client_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased; // Prioritize shutdown over other events.

            _ = await_shutdown_signal() => {
                ctx.state.request_stop();
                break;
            },

            _ = shutdown_rx.recv() => {
                // Stop requested in-band (`__STOP__`) or programmatically.
                break;
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Accepted new connection from: {addr}");
                        let handler = ConnectionHandler::new(
                            socket,
                            addr,
                            ctx.state.clone(),
                            ctx.state.subscribe_shutdown(),
                        );
                        client_tasks.spawn(async move {
                            if let Err(e) = handler.run().await {
                                warn!("Connection from {addr} terminated unexpectedly: {e}");
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {e}"),
                }
            },

            // Reap completed client tasks.
            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    // --- Graceful Shutdown Sequence ---
    info!("Shutting down. Closing the TCP acceptor.");
    drop(ctx.listener);

    if tokio::time::timeout(DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out draining client connections; aborting stragglers.");
    }
    client_tasks.shutdown().await;
    info!("All client connections closed.");

    // The UDP receiver and the tick producer exit on the shutdown signal.
    if tokio::time::timeout(DRAIN_TIMEOUT, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    }

    // Fire-and-forget UDP dispatch units settle against the task budget.
    if !ctx.state.drain_inflight(DRAIN_TIMEOUT).await {
        warn!("Timed out draining in-flight tasks; stragglers abandoned.");
    }

    ctx.state.close_store();
    info!("Host shutdown complete.");
}
