//! WebSocket framing. `tokio-tungstenite` already reassembles WS-level
//! fragmentation, so this layer's job is mapping PURCRDR op semantics onto
//! WS opcodes and re-applying the same in-memory payload ceiling the US
//! framing enforces, so both transports behave identically to callers.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::frame::MAX_INMEM_PAYLOAD_SIZE;
use crate::traits::{Packet, PacketKind, RecvOutcome, Transport, TransportKind};

/// A WebSocket transport wrapping an already-upgraded stream.
pub struct WsTransport {
    inner: Mutex<WebSocketStream<TcpStream>>,
}

impl WsTransport {
    pub fn new(stream: WebSocketStream<TcpStream>) -> Self {
        Self {
            inner: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_packet(&self, kind: PacketKind, payload: &[u8]) -> Result<()> {
        let msg = match kind {
            PacketKind::Text => {
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|e| TransportError::Protocol(format!("non-UTF8 text payload: {e}")))?;
                WsMessage::Text(text)
            }
            PacketKind::Binary => WsMessage::Binary(payload.to_vec()),
        };
        let mut stream = self.inner.lock().await;
        stream.send(msg).await?;
        Ok(())
    }

    async fn recv_packet(&self) -> Result<RecvOutcome> {
        let mut stream = self.inner.lock().await;
        loop {
            let Some(msg) = stream.next().await else {
                return Err(TransportError::Closed);
            };
            let msg = msg?;
            match msg {
                WsMessage::Text(text) => {
                    if text.len() > MAX_INMEM_PAYLOAD_SIZE {
                        return Err(TransportError::TooLarge {
                            size: text.len(),
                            max: MAX_INMEM_PAYLOAD_SIZE,
                        });
                    }
                    return Ok(RecvOutcome::Packet(Packet {
                        kind: PacketKind::Text,
                        payload: Bytes::from(text.into_bytes()),
                    }));
                }
                WsMessage::Binary(data) => {
                    if data.len() > MAX_INMEM_PAYLOAD_SIZE {
                        return Err(TransportError::TooLarge {
                            size: data.len(),
                            max: MAX_INMEM_PAYLOAD_SIZE,
                        });
                    }
                    return Ok(RecvOutcome::Packet(Packet {
                        kind: PacketKind::Binary,
                        payload: Bytes::from(data),
                    }));
                }
                WsMessage::Ping(_) => return Ok(RecvOutcome::Ping),
                WsMessage::Pong(_) => return Ok(RecvOutcome::Pong),
                WsMessage::Close(_) => return Err(TransportError::Closed),
                WsMessage::Frame(_) => continue,
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut stream = self.inner.lock().await;
        stream.send(WsMessage::Ping(Vec::new())).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut stream = self.inner.lock().await;
        stream.close(None).await?;
        debug!("WS transport closed");
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}
