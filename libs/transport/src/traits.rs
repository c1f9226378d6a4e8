//! The `Transport` capability set. The message layer and everything above
//! it never branches on transport kind; it only calls through this trait.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Which framing carried a packet, so callers don't need to guess from its
/// content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Text,
    Binary,
}

/// A reassembled, de-fragmented application packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub kind: PacketKind,
    pub payload: Bytes,
}

/// Outcome of one `recv_packet` call. `Ping`/`Pong` are keepalive traffic
/// the transport already handled (a `Ping` is answered with a `Pong`
/// automatically); callers only see them to update liveness bookkeeping.
#[derive(Debug)]
pub enum RecvOutcome {
    Packet(Packet),
    Ping,
    Pong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Unix,
    WebSocket,
}

/// The entire surface the message codec and everything above it needs from
/// a transport. Implemented by [`crate::unix::UsTransport`] and
/// [`crate::ws::WsTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one packet, transparently fragmenting if it exceeds the
    /// transport's per-frame limit.
    async fn send_packet(&self, kind: PacketKind, payload: &[u8]) -> Result<()>;

    /// Receive and reassemble the next packet, or report a keepalive event.
    async fn recv_packet(&self) -> Result<RecvOutcome>;

    /// Send a bare ping frame.
    async fn ping(&self) -> Result<()>;

    /// Send a close frame and release the underlying socket.
    async fn close(&self) -> Result<()>;

    fn kind(&self) -> TransportKind;
}
