//! Server-side error type, bridging the lower layers' error taxonomies
//! into one enum the dispatcher and multiplexer share.

use thiserror::Error;

use purcrdr_protocol::ErrorCode;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[from] purcrdr_transport::TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] purcrdr_protocol::ProtocolError),

    #[error("DOM error: {0}")]
    Dom(#[from] purcrdr_dom::DomError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Internal(#[from] ErrorCode),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Map a [`ServerError`] onto the internal [`ErrorCode`] taxonomy, so
/// handlers can turn any failure into a wire `retCode` without
/// re-deriving the mapping.
impl ServerError {
    pub fn to_error_code(&self) -> ErrorCode {
        match self {
            ServerError::Transport(purcrdr_transport::TransportError::TooLarge { .. }) => {
                ErrorCode::TooLarge
            }
            ServerError::Transport(purcrdr_transport::TransportError::Closed) => ErrorCode::Closed,
            ServerError::Transport(_) => ErrorCode::Io,
            ServerError::Protocol(_) => ErrorCode::Protocol,
            ServerError::Dom(purcrdr_dom::DomError::UnknownHandle(_)) => ErrorCode::InvalidValue,
            ServerError::Dom(purcrdr_dom::DomError::UnsupportedProperty(_)) => {
                ErrorCode::InvalidValue
            }
            ServerError::Dom(_) => ErrorCode::CantLoad,
            ServerError::Io(_) => ErrorCode::Io,
            ServerError::Config(_) => ErrorCode::ServerError,
            ServerError::Internal(code) => *code,
        }
    }
}
