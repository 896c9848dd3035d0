//! Reliable UDP wire messages.
//!
//! ```text
//! data: [kind=1][id u64][mode u8][alive_ms u32][payload...]
//! ack:  [kind=2][id u64]
//! ```
//!
//! All integers are big-endian. The whole datagram is sealed by the
//! channel's [`DatagramCodec`](crate::transport::DatagramCodec).

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::UdpError;

const KIND_DATA: u8 = 1;
const KIND_ACK: u8 = 2;

/// Size of a data header.
pub const DATA_HEADER_SIZE: usize = 1 + 8 + 1 + 4;

/// Size of an ack.
pub const ACK_SIZE: usize = 1 + 8;

/// How the receiver acknowledges a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AckMode {
    /// Fire and forget.
    None = 0,
    /// Ack on arrival, then deliver.
    Semi = 1,
    /// Deliver, then ack if every handler succeeded.
    Full = 2,
}

impl TryFrom<u8> for AckMode {
    type Error = UdpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AckMode::None),
            1 => Ok(AckMode::Semi),
            2 => Ok(AckMode::Full),
            other => Err(UdpError::decode(format!("unknown ack mode {other}"))),
        }
    }
}

/// An application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpMessage {
    /// Sender-assigned id.
    pub id: u64,
    /// Acknowledgment mode.
    pub ack_mode: AckMode,
    /// How long the receiver remembers the id.
    pub alive: Duration,
    /// Application payload.
    pub payload: Bytes,
}

/// Anything that travels in one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// Application message.
    Message(UdpMessage),
    /// Acknowledgment of a message id.
    Ack(u64),
}

impl Datagram {
    /// Serialize to bytes.
    pub fn encode(&self) -> Bytes {
        match self {
            Datagram::Message(msg) => {
                let alive_ms = u32::try_from(msg.alive.as_millis()).unwrap_or(u32::MAX);
                let mut buf = BytesMut::with_capacity(DATA_HEADER_SIZE + msg.payload.len());
                buf.put_u8(KIND_DATA);
                buf.put_u64(msg.id);
                buf.put_u8(msg.ack_mode as u8);
                buf.put_u32(alive_ms);
                buf.put_slice(&msg.payload);
                buf.freeze()
            }
            Datagram::Ack(id) => {
                let mut buf = BytesMut::with_capacity(ACK_SIZE);
                buf.put_u8(KIND_ACK);
                buf.put_u64(*id);
                buf.freeze()
            }
        }
    }

    /// Parse from bytes.
    pub fn decode(mut data: Bytes) -> Result<Self, UdpError> {
        if data.is_empty() {
            return Err(UdpError::decode("empty datagram"));
        }

        match data.get_u8() {
            KIND_DATA => {
                if data.len() < DATA_HEADER_SIZE - 1 {
                    return Err(UdpError::decode(format!(
                        "data header truncated: {} bytes",
                        data.len() + 1
                    )));
                }
                let id = data.get_u64();
                let ack_mode = AckMode::try_from(data.get_u8())?;
                let alive = Duration::from_millis(u64::from(data.get_u32()));
                Ok(Datagram::Message(UdpMessage {
                    id,
                    ack_mode,
                    alive,
                    payload: data,
                }))
            }
            KIND_ACK => {
                if data.len() != ACK_SIZE - 1 {
                    return Err(UdpError::decode(format!(
                        "ack must be {ACK_SIZE} bytes, got {}",
                        data.len() + 1
                    )));
                }
                Ok(Datagram::Ack(data.get_u64()))
            }
            other => Err(UdpError::decode(format!("unknown datagram kind {other}"))),
        }
    }
}
