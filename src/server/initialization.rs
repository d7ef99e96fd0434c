// src/server/initialization.rs

//! Handles the complete host initialization process: state store, sockets,
//! port resolution, and the readiness banner.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;
use tracing::info;

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::ServerState;

/// Initializes all host components before starting the main loop.
///
/// Binds TCP first so an unspecified (`0`) UDP port can be derived from the
/// resolved TCP port. The banner is emitted only after both sockets are
/// listening; the watchdog greps stdout for it.
pub async fn setup(mut config: Config) -> Result<ServerContext> {
    let listener = TcpListener::bind((config.host.as_str(), config.tcp_port))
        .await
        .with_context(|| format!("Failed to bind TCP {}:{}", config.host, config.tcp_port))?;
    config.tcp_port = listener.local_addr()?.port();
    info!("TCP listener on {}:{}", config.host, config.tcp_port);

    let udp_port = match config.udp_port {
        0 => config
            .tcp_port
            .checked_add(1)
            .ok_or_else(|| anyhow!("Cannot derive udp_port from tcp_port {}", config.tcp_port))?,
        port => port,
    };
    let udp_socket = UdpSocket::bind((config.host.as_str(), udp_port))
        .await
        .with_context(|| format!("Failed to bind UDP {}:{udp_port}", config.host))?;
    config.udp_port = udp_socket.local_addr()?.port();
    info!("UDP endpoint on {}:{}", config.host, config.udp_port);

    let state = ServerState::initialize(config)?;
    info!("Host state initialized (db: {}).", state.config.db_path.display());

    announce_ready(&state.config)?;

    Ok(ServerContext {
        state,
        listener,
        udp_socket: Arc::new(udp_socket),
        background_tasks: JoinSet::new(),
    })
}

/// One flushed stdout line; everything else the host prints goes to stderr.
fn announce_ready(config: &Config) -> Result<()> {
    println!(
        "runtime_host_server_ready host={} tcp_port={} udp_port={} runtime={}",
        config.host, config.tcp_port, config.udp_port, config.runtime_name
    );
    std::io::stdout().flush().context("Failed to flush banner")?;
    Ok(())
}
