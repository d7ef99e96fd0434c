// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a
//! TCP client connection.
//!
//! The first frame decides the framing for the connection's lifetime: a
//! binary request is answered inline and the connection closes; a text
//! connection loops, serving at most one in-flight dispatch at a time so
//! replies are emitted in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::guard::ConnectionGuard;
use crate::core::commands::{TextCommand, TransportKind};
use crate::core::handler;
use crate::core::metrics;
use crate::core::protocol::line::{self, MAX_INBOUND_TEXT_FRAME, MAX_OUTBOUND_TEXT_FRAME};
use crate::core::protocol::wire;
use crate::core::protocol::{HostFrame, HostFrameCodec};
use crate::core::state::{self, ServerState};
use crate::core::HostError;

const BACKPRESSURE_REPLY: &[u8] = b"ERR_BACKPRESSURE\n";
const COMMAND_TOO_LARGE_REPLY: &[u8] = b"ERR_CODEC_COMMAND_TOO_LARGE\n";
const FRAME_TOO_LARGE_REPLY: &[u8] = b"ERR_CODEC_FRAME_TOO_LARGE\n";

/// Manages the full lifecycle of a client connection.
pub struct ConnectionHandler {
    framed: Framed<TcpStream, HostFrameCodec>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    pub fn new(
        socket: TcpStream,
        addr: SocketAddr,
        state: Arc<ServerState>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            framed: Framed::new(socket, HostFrameCodec::new()),
            addr,
            state,
            shutdown_rx,
        }
    }

    /// The main event loop for the connection.
    pub async fn run(mut self) -> Result<(), HostError> {
        let _guard = ConnectionGuard::new(self.state.clone(), self.addr);

        match self.serve().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_incomplete_read() => {
                // Peer went away mid-frame; count it and close quietly.
                debug!("Connection from {} ended mid-frame: {e}", self.addr);
                self.state.increment(metrics::REJECTED_COMMAND_COUNT, 1);
                Ok(())
            }
            Err(e) => {
                self.state.with_core(|core| {
                    core.metrics.increment(metrics::ERROR_COUNT, 1);
                    core.metrics.increment(metrics::REJECTED_COMMAND_COUNT, 1);
                });
                Err(e)
            }
        }
    }

    async fn serve(&mut self) -> Result<(), HostError> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Connection handler for {} received shutdown signal.", self.addr);
                    return Ok(());
                }
                result = self.framed.next() => {
                    match result {
                        Some(Ok(HostFrame::Binary(payload))) => {
                            self.handle_binary(payload).await?;
                            // The demux decision is final: the binary path
                            // answers once and the connection closes.
                            return Ok(());
                        }
                        Some(Ok(HostFrame::Line(raw))) => {
                            if self.handle_line(raw).await? {
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => return Err(e),
                        None => {
                            debug!("Connection from {} closed by peer.", self.addr);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    async fn handle_binary(&mut self, payload: Bytes) -> Result<(), HostError> {
        self.state.with_core(|core| {
            core.metrics.add_bytes(metrics::TCP_RX_BYTES, payload.len() as i64);
            core.metrics.increment(metrics::TCP_RX_PACKET_COUNT, 1);
        });

        let drift = self.state.config.drift_mode;
        let response = self
            .state
            .with_core(|core| wire::handle_request(&mut core.metrics, drift, &payload));
        if let Some(bytes) = response {
            self.send_counted(Bytes::from(bytes)).await?;
        }
        Ok(())
    }

    /// Handles one text frame. Returns `true` when the connection should close.
    async fn handle_line(&mut self, raw: Bytes) -> Result<bool, HostError> {
        self.state.with_core(|core| {
            core.metrics.add_bytes(metrics::TCP_RX_BYTES, raw.len() as i64);
            core.metrics.increment(metrics::CODEC_FRAME_PARSE_COUNT, 1);
        });

        if raw.len() > MAX_INBOUND_TEXT_FRAME {
            self.state.with_core(|core| {
                core.metrics.increment(metrics::CODEC_ERROR_COUNT, 1);
                core.metrics.increment(metrics::REJECTED_COMMAND_COUNT, 1);
            });
            self.send_counted(Bytes::from_static(COMMAND_TOO_LARGE_REPLY))
                .await?;
            return Ok(false);
        }

        let command_line = line::line_to_command(&raw);
        let task = state::spawn_dispatch(
            &self.state,
            process_text_command(self.state.clone(), command_line),
        );

        let Some(handle) = task else {
            state::note_backpressure_drop(&self.state);
            self.send_counted(Bytes::from_static(BACKPRESSURE_REPLY))
                .await?;
            return Ok(false);
        };

        match handle.await {
            Ok(Some((payload, should_close))) => {
                self.send_counted(payload).await?;
                Ok(should_close)
            }
            // The dispatch failed; the task wrapper already counted it and
            // there is nothing to send.
            Ok(None) => Ok(false),
            Err(e) => {
                warn!("Dispatch task for {} did not complete: {e}", self.addr);
                self.state.increment(metrics::ERROR_COUNT, 1);
                Ok(false)
            }
        }
    }

    /// Writes one reply and maintains the TX counters.
    async fn send_counted(&mut self, payload: Bytes) -> Result<(), HostError> {
        let len = payload.len() as i64;
        self.framed.send(payload).await?;
        self.state.with_core(|core| {
            core.metrics.increment(metrics::TCP_TX_PACKET_COUNT, 1);
            core.metrics.add_bytes(metrics::TCP_TX_BYTES, len);
        });
        Ok(())
    }
}

/// The scheduled unit for one TCP text command: parse, execute, frame the
/// reply. The caller owns the socket and writes the returned payload.
/// Replies over the outbound frame limit are replaced with
/// `ERR_CODEC_FRAME_TOO_LARGE` and never close the connection.
pub async fn process_text_command(
    state: Arc<ServerState>,
    command_line: String,
) -> Result<(Bytes, bool), HostError> {
    state.increment(metrics::TCP_RX_PACKET_COUNT, 1);

    let command = TextCommand::parse(&command_line);
    let (reply, mut should_close) =
        handler::execute(&state, command, TransportKind::Tcp).await?;

    let mut payload = format!("{reply}\n").into_bytes();
    if payload.len() > MAX_OUTBOUND_TEXT_FRAME {
        state.with_core(|core| {
            core.metrics.increment(metrics::CODEC_ERROR_COUNT, 1);
            core.metrics.increment(metrics::REJECTED_COMMAND_COUNT, 1);
        });
        payload = FRAME_TOO_LARGE_REPLY.to_vec();
        should_close = false;
    }
    state.increment(metrics::CODEC_FRAME_BUILD_COUNT, 1);

    Ok((Bytes::from(payload), should_close))
}
