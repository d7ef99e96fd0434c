// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the host.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete frame in stream")]
    IncompleteFrame,

    #[error("Inbound frame exceeds the protocol limit")]
    FrameTooLarge,

    #[error("Store Error: {0}")]
    Store(Arc<rusqlite::Error>),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` and `rusqlite::Error`
// are not cloneable. We wrap them in an Arc to allow for cheap, shared cloning.
impl Clone for HostError {
    fn clone(&self) -> Self {
        match self {
            HostError::Io(e) => HostError::Io(Arc::clone(e)),
            HostError::IncompleteFrame => HostError::IncompleteFrame,
            HostError::FrameTooLarge => HostError::FrameTooLarge,
            HostError::Store(e) => HostError::Store(Arc::clone(e)),
            HostError::Internal(s) => HostError::Internal(s.clone()),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        HostError::Io(Arc::new(e))
    }
}

impl From<rusqlite::Error> for HostError {
    fn from(e: rusqlite::Error) -> Self {
        HostError::Store(Arc::new(e))
    }
}

impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> Self {
        HostError::Internal(format!("JSON serialization error: {e}"))
    }
}

impl HostError {
    /// True for errors that simply mean the peer went away mid-frame.
    pub fn is_incomplete_read(&self) -> bool {
        match self {
            HostError::IncompleteFrame => true,
            HostError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
