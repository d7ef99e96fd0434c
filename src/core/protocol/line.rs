// src/core/protocol/line.rs

//! Implements the inbound frame structure and the corresponding `Decoder` /
//! `Encoder` for network communication.
//!
//! Two framings share the TCP stream: line-terminated UTF-8 text commands
//! and the fixed-length binary request. The first byte of a connection picks
//! the framing, and that decision is final for the connection's lifetime.
//! The binary path answers and closes, and a connection that opened with
//! text never re-enters the demultiplexer.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::HostError;
use crate::core::protocol::wire;

/// Maximum inbound text frame, terminator included. Longer lines are
/// answered with `ERR_CODEC_COMMAND_TOO_LARGE` and never dispatched.
pub const MAX_INBOUND_TEXT_FRAME: usize = 2048;

/// Maximum outbound text reply; larger replies are replaced with
/// `ERR_CODEC_FRAME_TOO_LARGE`. Doubles as the cap on how long we buffer an
/// unterminated inbound line before giving up on the stream.
pub const MAX_OUTBOUND_TEXT_FRAME: usize = 65536;

/// One inbound frame from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum HostFrame {
    /// Raw line bytes, terminator included when the peer sent one.
    Line(Bytes),
    /// A complete binary request, exactly the canonical length.
    Binary(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemuxMode {
    Undecided,
    Text,
}

/// A `tokio_util::codec` implementation for the dual text/binary framing.
#[derive(Debug)]
pub struct HostFrameCodec {
    mode: DemuxMode,
}

impl Default for HostFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HostFrameCodec {
    pub fn new() -> Self {
        Self {
            mode: DemuxMode::Undecided,
        }
    }
}

impl Decoder for HostFrameCodec {
    type Item = HostFrame;
    type Error = HostError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<HostFrame>, HostError> {
        if src.is_empty() {
            return Ok(None);
        }

        if self.mode == DemuxMode::Undecided {
            if src[0] == wire::prelude_byte() {
                let needed = wire::canonical_request_len();
                if src.len() < needed {
                    src.reserve(needed - src.len());
                    return Ok(None);
                }
                return Ok(Some(HostFrame::Binary(src.split_to(needed).freeze())));
            }
            self.mode = DemuxMode::Text;
        }

        match src.iter().position(|&b| b == b'\n') {
            Some(pos) => Ok(Some(HostFrame::Line(src.split_to(pos + 1).freeze()))),
            None if src.len() > MAX_OUTBOUND_TEXT_FRAME => Err(HostError::FrameTooLarge),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<HostFrame>, HostError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }
        if self.mode == DemuxMode::Undecided && src[0] == wire::prelude_byte() {
            // Peer hung up mid-way through a binary request.
            return Err(HostError::IncompleteFrame);
        }
        // A final text line without its terminator still dispatches.
        let rest = src.len();
        Ok(Some(HostFrame::Line(src.split_to(rest).freeze())))
    }
}

impl Encoder<Bytes> for HostFrameCodec {
    type Error = HostError;

    /// Replies are framed by the dispatcher (text) or the wire module
    /// (binary); the encoder writes them through unchanged.
    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), HostError> {
        dst.extend_from_slice(item.chunk());
        Ok(())
    }
}

/// Converts raw line bytes into the command string: lossy UTF-8, then both
/// terminator characters stripped from either end.
pub fn line_to_command(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(['\r', '\n'])
        .to_string()
}
