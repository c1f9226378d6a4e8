//! PURCMC/PURCRDR message codec, error taxonomy, and protocol constants.

pub mod constants;
pub mod error;
pub mod message;

pub use constants::*;
pub use error::{ErrorCode, StatusCode};
pub use message::{
    parse, serialize, DataType, ElementLocator, ElementType, EventMessage, Message,
    ProtocolError, RequestMessage, ResponseMessage, Target,
};
