//! US (Unix-socket) framing: fixed 12-byte header, fragmentation and
//! reassembly, `PING`/`PONG`/`CLOSE` handling.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::frame::{FrameHeader, OpCode, HEADER_LEN, MAX_FRAME_PAYLOAD_SIZE, MAX_INMEM_PAYLOAD_SIZE};
use crate::traits::{Packet, PacketKind, RecvOutcome, Transport, TransportKind};

/// A Unix-domain-socket transport. Read and write halves are split so a
/// `ping` or `close` can proceed while a `recv_packet` is in flight.
pub struct UsTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

impl UsTransport {
    pub fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }
    }

    async fn write_frame(writer: &mut OwnedWriteHalf, header: FrameHeader, payload: &[u8]) -> Result<()> {
        writer.write_all(&header.encode()).await?;
        if !payload.is_empty() {
            writer.write_all(payload).await?;
        }
        Ok(())
    }

    async fn read_header(reader: &mut OwnedReadHalf) -> Result<FrameHeader> {
        let mut buf = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    TransportError::Closed
                } else {
                    TransportError::Io(e)
                }
            })?;
        FrameHeader::decode(&buf)
    }
}

#[async_trait]
impl Transport for UsTransport {
    async fn send_packet(&self, kind: PacketKind, payload: &[u8]) -> Result<()> {
        let op = match kind {
            PacketKind::Text => OpCode::Text,
            PacketKind::Binary => OpCode::Bin,
        };
        let mut writer = self.writer.lock().await;

        if payload.len() <= MAX_FRAME_PAYLOAD_SIZE {
            let header = FrameHeader {
                op,
                fragmented: 0,
                sz_payload: payload.len() as u32,
            };
            return Self::write_frame(&mut writer, header, payload).await;
        }

        let total = payload.len();
        let head = FrameHeader {
            op,
            fragmented: total as u32,
            sz_payload: MAX_FRAME_PAYLOAD_SIZE as u32,
        };
        Self::write_frame(&mut writer, head, &payload[..MAX_FRAME_PAYLOAD_SIZE]).await?;

        let mut offset = MAX_FRAME_PAYLOAD_SIZE;
        while total - offset > MAX_FRAME_PAYLOAD_SIZE {
            let chunk = &payload[offset..offset + MAX_FRAME_PAYLOAD_SIZE];
            let header = FrameHeader {
                op: OpCode::Continuation,
                fragmented: 0,
                sz_payload: chunk.len() as u32,
            };
            Self::write_frame(&mut writer, header, chunk).await?;
            offset += MAX_FRAME_PAYLOAD_SIZE;
        }

        let tail = &payload[offset..];
        let header = FrameHeader {
            op: OpCode::End,
            fragmented: 0,
            sz_payload: tail.len() as u32,
        };
        Self::write_frame(&mut writer, header, tail).await
    }

    async fn recv_packet(&self) -> Result<RecvOutcome> {
        let mut reader = self.reader.lock().await;
        let header = Self::read_header(&mut reader).await?;

        match header.op {
            OpCode::Ping => {
                drop(reader);
                let mut writer = self.writer.lock().await;
                Self::write_frame(
                    &mut writer,
                    FrameHeader {
                        op: OpCode::Pong,
                        fragmented: 0,
                        sz_payload: 0,
                    },
                    &[],
                )
                .await?;
                Ok(RecvOutcome::Ping)
            }
            OpCode::Pong => Ok(RecvOutcome::Pong),
            OpCode::Close => Err(TransportError::Closed),
            OpCode::Text | OpCode::Bin => {
                if header.fragmented as usize > MAX_INMEM_PAYLOAD_SIZE {
                    return Err(TransportError::TooLarge {
                        size: header.fragmented as usize,
                        max: MAX_INMEM_PAYLOAD_SIZE,
                    });
                }
                let capacity = header.fragmented.max(header.sz_payload) as usize;
                let mut buf = BytesMut::with_capacity(capacity);
                let mut chunk = vec![0u8; header.sz_payload as usize];
                reader.read_exact(&mut chunk).await?;
                buf.extend_from_slice(&chunk);

                if header.fragmented > 0 {
                    loop {
                        let cont_header = Self::read_header(&mut reader).await?;
                        match cont_header.op {
                            OpCode::Continuation | OpCode::End => {
                                if buf.len() + cont_header.sz_payload as usize > MAX_INMEM_PAYLOAD_SIZE
                                {
                                    return Err(TransportError::TooLarge {
                                        size: buf.len() + cont_header.sz_payload as usize,
                                        max: MAX_INMEM_PAYLOAD_SIZE,
                                    });
                                }
                                let mut piece = vec![0u8; cont_header.sz_payload as usize];
                                reader.read_exact(&mut piece).await?;
                                buf.extend_from_slice(&piece);
                                if matches!(cont_header.op, OpCode::End) {
                                    break;
                                }
                            }
                            other => {
                                return Err(TransportError::Protocol(format!(
                                    "expected CONTINUATION or END, got {other:?}"
                                )))
                            }
                        }
                    }
                }

                trace!(bytes = buf.len(), "reassembled US packet");
                let kind = if matches!(header.op, OpCode::Text) {
                    PacketKind::Text
                } else {
                    PacketKind::Binary
                };
                Ok(RecvOutcome::Packet(Packet {
                    kind,
                    payload: Bytes::from(buf),
                }))
            }
            OpCode::Continuation | OpCode::End => Err(TransportError::Protocol(
                "unexpected CONTINUATION/END with no preceding head frame".into(),
            )),
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        Self::write_frame(
            &mut writer,
            FrameHeader {
                op: OpCode::Ping,
                fragmented: 0,
                sz_payload: 0,
            },
            &[],
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let _ = Self::write_frame(
            &mut writer,
            FrameHeader {
                op: OpCode::Close,
                fragmented: 0,
                sz_payload: 0,
            },
            &[],
        )
        .await;
        writer.shutdown().await?;
        debug!("US transport closed");
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Unix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    async fn pair() -> (UsTransport, UsTransport) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let client = UnixStream::connect(&path).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (UsTransport::new(server), UsTransport::new(client))
    }

    #[tokio::test]
    async fn small_text_packet_round_trips() {
        let (server, client) = pair().await;
        client.send_packet(PacketKind::Text, b"hello").await.unwrap();
        match server.recv_packet().await.unwrap() {
            RecvOutcome::Packet(p) => {
                assert_eq!(p.kind, PacketKind::Text);
                assert_eq!(&p.payload[..], b"hello");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fragmented_packet_reassembles() {
        let (server, client) = pair().await;
        let payload = vec![0x42u8; MAX_FRAME_PAYLOAD_SIZE * 2 + 17];
        let payload_clone = payload.clone();
        let send = tokio::spawn(async move {
            client.send_packet(PacketKind::Binary, &payload_clone).await.unwrap();
        });
        match server.recv_packet().await.unwrap() {
            RecvOutcome::Packet(p) => {
                assert_eq!(p.kind, PacketKind::Binary);
                assert_eq!(&p.payload[..], &payload[..]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        send.await.unwrap();
    }

    #[tokio::test]
    async fn exactly_one_frame_boundary() {
        let (server, client) = pair().await;
        let payload = vec![1u8; MAX_FRAME_PAYLOAD_SIZE];
        let payload_clone = payload.clone();
        tokio::spawn(async move {
            client.send_packet(PacketKind::Text, &payload_clone).await.unwrap();
        });
        match server.recv_packet().await.unwrap() {
            RecvOutcome::Packet(p) => assert_eq!(p.payload.len(), MAX_FRAME_PAYLOAD_SIZE),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (server, client) = pair().await;
        server.ping().await.unwrap();
        match client.recv_packet().await.unwrap() {
            RecvOutcome::Ping => {}
            other => panic!("expected Ping, got {other:?}"),
        }
        match server.recv_packet().await.unwrap() {
            RecvOutcome::Pong => {}
            other => panic!("expected Pong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversize_payload_rejected() {
        let (server, client) = pair().await;
        let payload = vec![0u8; MAX_INMEM_PAYLOAD_SIZE + 1];
        tokio::spawn(async move {
            let _ = client.send_packet(PacketKind::Text, &payload).await;
        });
        let err = server.recv_packet().await.unwrap_err();
        assert!(matches!(err, TransportError::TooLarge { .. }));
    }
}
