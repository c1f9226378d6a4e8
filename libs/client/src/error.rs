//! Client-side error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] purcrdr_transport::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] purcrdr_protocol::ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timed out waiting for a response")]
    Timeout,

    #[error("connection is closed")]
    BadConnection,

    #[error("received a response for no outstanding request: {0}")]
    UnknownResult(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
