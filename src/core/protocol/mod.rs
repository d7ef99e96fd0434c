// src/core/protocol/mod.rs

pub mod line;
pub mod wire;

pub use line::{HostFrame, HostFrameCodec, MAX_INBOUND_TEXT_FRAME, MAX_OUTBOUND_TEXT_FRAME};
