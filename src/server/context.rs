// src/server/context.rs

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinSet;

use crate::core::state::ServerState;

/// Holds all the initialized state required to run the host's main loop.
pub struct ServerContext {
    pub state: Arc<ServerState>,
    pub listener: TcpListener,
    pub udp_socket: Arc<UdpSocket>,
    pub background_tasks: JoinSet<()>,
}

impl ServerContext {
    /// The resolved TCP listen address.
    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The resolved UDP endpoint address.
    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp_socket.local_addr()
    }
}
