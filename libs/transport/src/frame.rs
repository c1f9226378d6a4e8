//! The US (Unix-socket) frame header and op codes.

use crate::error::{Result, TransportError};

/// Largest payload a single US frame may carry.
pub const MAX_FRAME_PAYLOAD_SIZE: usize = 4096;
/// Largest payload a fully reassembled packet may carry, across both
/// framings.
pub const MAX_INMEM_PAYLOAD_SIZE: usize = 40960;

/// Size in bytes of the on-wire frame header.
pub const HEADER_LEN: usize = 12;

/// Frame opcodes, encoded as `u32` little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0,
    Text = 1,
    Bin = 2,
    End = 3,
    Close = 4,
    Ping = 5,
    Pong = 6,
}

impl OpCode {
    pub fn from_u32(v: u32) -> Result<Self> {
        Ok(match v {
            0 => OpCode::Continuation,
            1 => OpCode::Text,
            2 => OpCode::Bin,
            3 => OpCode::End,
            4 => OpCode::Close,
            5 => OpCode::Ping,
            6 => OpCode::Pong,
            other => {
                return Err(TransportError::Protocol(format!(
                    "unknown frame opcode {other}"
                )))
            }
        })
    }
}

/// The fixed 12-byte US frame header.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub op: OpCode,
    /// Total payload size on the first frame of a fragmented packet; zero on
    /// continuation/end frames and on unfragmented packets.
    pub fragmented: u32,
    /// Bytes of payload carried by this specific frame.
    pub sz_payload: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&(self.op as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&self.fragmented.to_le_bytes());
        buf[8..12].copy_from_slice(&self.sz_payload.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let op = OpCode::from_u32(u32::from_le_bytes(buf[0..4].try_into().unwrap()))?;
        let fragmented = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let sz_payload = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if sz_payload as usize > MAX_FRAME_PAYLOAD_SIZE {
            return Err(TransportError::TooLarge {
                size: sz_payload as usize,
                max: MAX_FRAME_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            op,
            fragmented,
            sz_payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = FrameHeader {
            op: OpCode::Text,
            fragmented: 12345,
            sz_payload: 4096,
        };
        let encoded = h.encode();
        let decoded = FrameHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.op as u32, OpCode::Text as u32);
        assert_eq!(decoded.fragmented, 12345);
        assert_eq!(decoded.sz_payload, 4096);
    }

    #[test]
    fn oversize_payload_in_header_rejected() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes());
        buf[8..12].copy_from_slice(&(MAX_FRAME_PAYLOAD_SIZE as u32 + 1).to_le_bytes());
        assert!(FrameHeader::decode(&buf).is_err());
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert!(OpCode::from_u32(99).is_err());
    }
}
