// src/server/udp_loop.rs

//! The UDP datagram receiver.
//!
//! Each datagram is demultiplexed on its first byte (independently of every
//! other datagram) and dispatched as a scheduled unit against the task
//! budget, so datagrams process concurrently with no ordering guarantee.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::core::HostError;
use crate::core::commands::{TextCommand, TransportKind};
use crate::core::handler;
use crate::core::metrics;
use crate::core::protocol::line::{self, MAX_INBOUND_TEXT_FRAME};
use crate::core::protocol::wire;
use crate::core::state::{self, ServerState};

const BACKPRESSURE_REPLY: &[u8] = b"ERR_BACKPRESSURE\n";
const COMMAND_TOO_LARGE_REPLY: &[u8] = b"ERR_CODEC_COMMAND_TOO_LARGE\n";

pub struct UdpLoop {
    state: Arc<ServerState>,
    socket: Arc<UdpSocket>,
}

impl UdpLoop {
    pub fn new(state: Arc<ServerState>, socket: Arc<UdpSocket>) -> Self {
        Self { state, socket }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("UDP receiver started.");
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("UDP receiver shutting down.");
                    return;
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => self.on_datagram(&buf[..len], addr).await,
                        Err(e) => {
                            // Socket-level errors keep the loop alive.
                            warn!("UDP receive error: {e}");
                            self.state.increment(metrics::ERROR_COUNT, 1);
                        }
                    }
                }
            }
        }
    }

    async fn on_datagram(&self, data: &[u8], addr: SocketAddr) {
        self.state.with_core(|core| {
            core.metrics.increment(metrics::UDP_RX_DATAGRAM_COUNT, 1);
            core.metrics.add_bytes(metrics::UDP_RX_BYTES, data.len() as i64);
        });

        let task = state::spawn_dispatch(
            &self.state,
            process_datagram(
                self.state.clone(),
                self.socket.clone(),
                Bytes::copy_from_slice(data),
                addr,
            ),
        );

        // Fire and forget: the task wrapper owns completion accounting and
        // shutdown waits on the budget, not on handles.
        if task.is_none() {
            state::note_backpressure_drop(&self.state);
            if let Err(e) = self.socket.send_to(BACKPRESSURE_REPLY, addr).await {
                debug!("Failed to send backpressure reply to {addr}: {e}");
            } else {
                count_tx(&self.state, BACKPRESSURE_REPLY.len());
            }
        }
    }
}

/// The scheduled unit for one datagram: demux, execute, answer in kind.
async fn process_datagram(
    state: Arc<ServerState>,
    socket: Arc<UdpSocket>,
    data: Bytes,
    addr: SocketAddr,
) -> Result<(), HostError> {
    state.increment(metrics::CODEC_FRAME_PARSE_COUNT, 1);

    if data.first() == Some(&wire::prelude_byte()) {
        let drift = state.config.drift_mode;
        let response = state.with_core(|core| wire::handle_request(&mut core.metrics, drift, &data));
        if let Some(bytes) = response {
            socket.send_to(&bytes, addr).await?;
            count_tx(&state, bytes.len());
        }
        return Ok(());
    }

    if data.len() > MAX_INBOUND_TEXT_FRAME {
        state.with_core(|core| {
            core.metrics.increment(metrics::CODEC_ERROR_COUNT, 1);
            core.metrics.increment(metrics::REJECTED_COMMAND_COUNT, 1);
        });
        socket.send_to(COMMAND_TOO_LARGE_REPLY, addr).await?;
        count_tx(&state, COMMAND_TOO_LARGE_REPLY.len());
        return Ok(());
    }

    let command_line = line::line_to_command(&data);
    let command = TextCommand::parse(&command_line);
    let (reply, _) = handler::execute(&state, command, TransportKind::Udp).await?;

    let payload = format!("{reply}\n");
    state.increment(metrics::CODEC_FRAME_BUILD_COUNT, 1);
    socket.send_to(payload.as_bytes(), addr).await?;
    count_tx(&state, payload.len());
    Ok(())
}

fn count_tx(state: &ServerState, len: usize) {
    state.with_core(|core| {
        core.metrics.increment(metrics::UDP_TX_DATAGRAM_COUNT, 1);
        core.metrics.add_bytes(metrics::UDP_TX_BYTES, len as i64);
    });
}
