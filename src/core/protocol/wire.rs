// src/core/protocol/wire.rs

//! The fixed binary request/response pair carried over the same sockets as
//! the text protocol.
//!
//! The schema is two protobuf messages, `Ping` and `Pong`. The host accepts
//! exactly one request content (the canonical fixture) and answers with the
//! canonical response; anything else on the binary path is a codec error.
//! The regression harness compares these bytes exactly, so the encoder must
//! not be generalized.

use lazy_static::lazy_static;
use prost::Message;

use crate::config::DriftMode;
use crate::core::metrics::{self, MetricsTable};

/// Fixture request values: the only accepted `Ping`.
pub const FIXTURE_PAYLOAD: &str = "foo";
pub const FIXTURE_SEQ: u32 = 7;

#[derive(Clone, PartialEq, Message)]
pub struct Ping {
    #[prost(string, tag = "1")]
    pub payload: String,
    #[prost(uint32, tag = "2")]
    pub seq: u32,
    #[prost(bool, tag = "3")]
    pub keep: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct Pong {
    #[prost(string, tag = "1")]
    pub payload: String,
    #[prost(uint32, tag = "2")]
    pub seq: u32,
    #[prost(bool, tag = "3")]
    pub ok: bool,
}

lazy_static! {
    /// Serialized `Ping{payload="foo", seq=7, keep=true}`: `0a03666f6f10071801`.
    pub static ref CANONICAL_REQUEST: Vec<u8> = Ping {
        payload: FIXTURE_PAYLOAD.to_string(),
        seq: FIXTURE_SEQ,
        keep: true,
    }
    .encode_to_vec();

    /// Serialized `Pong{payload="FOO", seq=7, ok=true}`: `0a03464f4f10071801`.
    pub static ref CANONICAL_RESPONSE: Vec<u8> = Pong {
        payload: FIXTURE_PAYLOAD.to_uppercase(),
        seq: FIXTURE_SEQ,
        ok: true,
    }
    .encode_to_vec();
}

/// First byte of the canonical request; the transport demultiplexer routes a
/// connection or datagram starting with it onto the binary path.
pub fn prelude_byte() -> u8 {
    CANONICAL_REQUEST[0]
}

pub fn canonical_request_len() -> usize {
    CANONICAL_REQUEST.len()
}

/// Decodes a binary request and, when it matches the fixture, builds the
/// response. Returns `None` (no reply bytes) on any codec error. Counter
/// updates mirror a successful exchange even under payload drift.
pub fn handle_request(m: &mut MetricsTable, drift: DriftMode, payload: &[u8]) -> Option<Vec<u8>> {
    m.increment(metrics::CODEC_FRAME_PARSE_COUNT, 1);
    m.increment(metrics::PROTOBUF_REQUEST_COUNT, 1);

    let ping = match Ping::decode(payload) {
        Ok(ping) => ping,
        Err(_) => {
            m.increment(metrics::REJECTED_COMMAND_COUNT, 1);
            m.increment(metrics::CODEC_ERROR_COUNT, 1);
            return None;
        }
    };

    if ping.payload != FIXTURE_PAYLOAD || ping.seq != FIXTURE_SEQ || !ping.keep {
        m.increment(metrics::REJECTED_COMMAND_COUNT, 1);
        m.increment(metrics::CODEC_ERROR_COUNT, 1);
        return None;
    }

    let reply_payload = if drift == DriftMode::Protobuf {
        ping.payload.to_lowercase()
    } else {
        ping.payload.to_uppercase()
    };
    let pong = Pong {
        payload: reply_payload,
        seq: ping.seq,
        ok: true,
    };

    m.increment(metrics::PROTOBUF_RESPONSE_COUNT, 1);
    m.increment(metrics::CODEC_FRAME_BUILD_COUNT, 1);
    Some(pong.encode_to_vec())
}
