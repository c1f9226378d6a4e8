//! The PurCRDR client connection: request/response correlation by
//! `requestId`, event dispatch, and keepalive pings over any
//! [`purcrdr_transport::Transport`].

pub mod connection;
pub mod error;
pub mod unix_bind;

pub use connection::{Connection, EventHandler};
pub use error::{ClientError, Result};
