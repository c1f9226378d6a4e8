//! The closed status-code and internal-error-code taxonomies, and the
//! mapping between them.

use thiserror::Error;

/// Wire-level, HTTP-inspired status codes carried in a response's
/// `result` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusCode {
    IoErr = 1,
    Ok = 200,
    Created = 201,
    Accepted = 202,
    NoContent = 204,
    ResetContent = 205,
    PartialContent = 206,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    NotAcceptable = 406,
    Conflict = 409,
    Gone = 410,
    PreconditionFailed = 412,
    PacketTooLarge = 413,
    ExpectationFailed = 417,
    ImATeapot = 418,
    UnprocessablePacket = 422,
    Locked = 423,
    FailedDependency = 424,
    TooEarly = 425,
    UpgradeRequired = 426,
    RetryWith = 449,
    UnavailableForLegalReasons = 451,
    InternalServerError = 500,
    NotImplemented = 501,
    BadCallee = 502,
    ServiceUnavailable = 503,
    CalleeTimeout = 504,
    InsufficientStorage = 507,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn message(self) -> &'static str {
        match self {
            StatusCode::IoErr => "I/O error",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::Accepted => "Accepted",
            StatusCode::NoContent => "No Content",
            StatusCode::ResetContent => "Reset Content",
            StatusCode::PartialContent => "Partial Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::NotAcceptable => "Not Acceptable",
            StatusCode::Conflict => "Conflict",
            StatusCode::Gone => "Gone",
            StatusCode::PreconditionFailed => "Precondition Failed",
            StatusCode::PacketTooLarge => "Packet Too Large",
            StatusCode::ExpectationFailed => "Expectation Failed",
            StatusCode::ImATeapot => "I'm a Teapot",
            StatusCode::UnprocessablePacket => "Unprocessable Packet",
            StatusCode::Locked => "Locked",
            StatusCode::FailedDependency => "Failed Dependency",
            StatusCode::TooEarly => "Too Early",
            StatusCode::UpgradeRequired => "Upgrade Required",
            StatusCode::RetryWith => "Retry With",
            StatusCode::UnavailableForLegalReasons => "Unavailable For Legal Reasons",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::BadCallee => "Bad Callee",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::CalleeTimeout => "Callee Timeout",
            StatusCode::InsufficientStorage => "Insufficient Storage",
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            1 => StatusCode::IoErr,
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            202 => StatusCode::Accepted,
            204 => StatusCode::NoContent,
            205 => StatusCode::ResetContent,
            206 => StatusCode::PartialContent,
            400 => StatusCode::BadRequest,
            401 => StatusCode::Unauthorized,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            406 => StatusCode::NotAcceptable,
            409 => StatusCode::Conflict,
            410 => StatusCode::Gone,
            412 => StatusCode::PreconditionFailed,
            413 => StatusCode::PacketTooLarge,
            417 => StatusCode::ExpectationFailed,
            418 => StatusCode::ImATeapot,
            422 => StatusCode::UnprocessablePacket,
            423 => StatusCode::Locked,
            424 => StatusCode::FailedDependency,
            425 => StatusCode::TooEarly,
            426 => StatusCode::UpgradeRequired,
            449 => StatusCode::RetryWith,
            451 => StatusCode::UnavailableForLegalReasons,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            502 => StatusCode::BadCallee,
            503 => StatusCode::ServiceUnavailable,
            504 => StatusCode::CalleeTimeout,
            507 => StatusCode::InsufficientStorage,
            _ => return None,
        })
    }
}

/// Internal error codes used inside the core before being mapped to a wire
/// [`StatusCode`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    #[error("I/O error")]
    Io,
    #[error("connection closed")]
    Closed,
    #[error("out of memory")]
    NoMem,
    #[error("payload too large")]
    TooLarge,
    #[error("protocol violation")]
    Protocol,
    #[error("upper layer error")]
    Upper,
    #[error("not implemented")]
    NotImplemented,
    #[error("invalid value")]
    InvalidValue,
    #[error("duplicated")]
    Duplicated,
    #[error("buffer too small")]
    TooSmallBuff,
    #[error("bad system call")]
    BadSystemCall,
    #[error("authentication failed")]
    AuthFailed,
    #[error("server error")]
    ServerError,
    #[error("timeout")]
    Timeout,
    #[error("unknown event")]
    UnknownEvent,
    #[error("unknown result")]
    UnknownResult,
    #[error("unknown method")]
    UnknownMethod,
    #[error("unexpected condition")]
    Unexpected,
    #[error("server refused")]
    ServerRefused,
    #[error("bad packet")]
    BadPacket,
    #[error("bad connection")]
    BadConnection,
    #[error("cannot load document")]
    CantLoad,
    #[error("bad key")]
    BadKey,
}

impl ErrorCode {
    /// The canonical mapping table, plus the unlisted "default" arm.
    pub fn to_status(self) -> StatusCode {
        match self {
            ErrorCode::Io => StatusCode::IoErr,
            ErrorCode::Closed => StatusCode::ServiceUnavailable,
            ErrorCode::NoMem => StatusCode::InsufficientStorage,
            ErrorCode::TooLarge => StatusCode::PacketTooLarge,
            ErrorCode::Protocol => StatusCode::UnprocessablePacket,
            ErrorCode::NotImplemented => StatusCode::NotImplemented,
            ErrorCode::InvalidValue => StatusCode::BadRequest,
            ErrorCode::Duplicated => StatusCode::Conflict,
            ErrorCode::AuthFailed => StatusCode::Unauthorized,
            ErrorCode::Timeout => StatusCode::CalleeTimeout,
            ErrorCode::UnknownMethod => StatusCode::NotFound,
            ErrorCode::Upper
            | ErrorCode::TooSmallBuff
            | ErrorCode::BadSystemCall
            | ErrorCode::ServerError
            | ErrorCode::UnknownEvent
            | ErrorCode::UnknownResult
            | ErrorCode::Unexpected
            | ErrorCode::ServerRefused
            | ErrorCode::BadPacket
            | ErrorCode::BadConnection
            | ErrorCode::CantLoad
            | ErrorCode::BadKey => StatusCode::InternalServerError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_round_trips() {
        for code in [200u16, 404, 413, 500, 202] {
            let sc = StatusCode::from_code(code).unwrap();
            assert_eq!(sc.code(), code);
        }
    }

    #[test]
    fn error_mapping_matches_status_table() {
        assert_eq!(ErrorCode::Io.to_status().code(), 1);
        assert_eq!(ErrorCode::Closed.to_status().code(), 503);
        assert_eq!(ErrorCode::NoMem.to_status().code(), 507);
        assert_eq!(ErrorCode::TooLarge.to_status().code(), 413);
        assert_eq!(ErrorCode::Protocol.to_status().code(), 422);
        assert_eq!(ErrorCode::NotImplemented.to_status().code(), 501);
        assert_eq!(ErrorCode::InvalidValue.to_status().code(), 400);
        assert_eq!(ErrorCode::Duplicated.to_status().code(), 409);
        assert_eq!(ErrorCode::AuthFailed.to_status().code(), 401);
        assert_eq!(ErrorCode::Timeout.to_status().code(), 504);
        assert_eq!(ErrorCode::UnknownMethod.to_status().code(), 404);
        assert_eq!(ErrorCode::Unexpected.to_status().code(), 500);
    }
}
