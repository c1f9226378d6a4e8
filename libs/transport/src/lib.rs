//! Framed packet transport: the US (Unix-socket) and WS (WebSocket)
//! framings behind one `Transport` capability set.

pub mod error;
pub mod frame;
pub mod traits;
pub mod unix;
pub mod ws;

pub use error::{Result, TransportError};
pub use frame::{FrameHeader, OpCode, HEADER_LEN, MAX_FRAME_PAYLOAD_SIZE, MAX_INMEM_PAYLOAD_SIZE};
pub use traits::{Packet, PacketKind, RecvOutcome, Transport, TransportKind};
pub use unix::UsTransport;
pub use ws::WsTransport;
