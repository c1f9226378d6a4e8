//! Transport-layer error type.

use thiserror::Error;

/// Errors raised by frame/packet transport. Every transport and framing
/// failure is fatal to the offending connection; callers close on any of
/// these.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer closed the connection")]
    Closed,

    #[error("framing protocol violation: {0}")]
    Protocol(String),

    #[error("payload of {size} bytes exceeds the maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("allocation failed for a {size}-byte payload")]
    NoMem { size: usize },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("operation not supported on this transport: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
