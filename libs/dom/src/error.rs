//! Errors raised by the DOM collaborator.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("malformed markup: {0}")]
    ParseError(String),
    #[error("no element found for handle {0:#x}")]
    UnknownHandle(u64),
    #[error("no element found for selector {0:?}")]
    UnknownSelector(String),
    #[error("property {0:?} is not supported on this element")]
    UnsupportedProperty(String),
    #[error("element has no parent to mutate relative to")]
    NoParent,
}

pub type Result<T> = std::result::Result<T, DomError>;
