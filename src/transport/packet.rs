//! Application packets carried inside the encrypted stream.
//!
//! Wire format:
//! ```text
//! ┌───────────┬────────────────┬──────────────────┐
//! │ Kind (1)  │ Body len (4)   │ Body (variable)  │
//! └───────────┴────────────────┴──────────────────┘
//! ```
//! Ping and Pong bodies are an 8-byte big-endian millisecond timestamp; the
//! pong echoes the ping's value so the sender can measure round-trip time.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::TransportError;
use crate::core::{MAX_PACKET_BODY, PACKET_HEADER_SIZE};

/// Packet kinds.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Application payload
    Data = 0x01,
    /// Heartbeat request
    Ping = 0x02,
    /// Heartbeat response
    Pong = 0x03,
}

impl TryFrom<u8> for PacketKind {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketKind::Data),
            0x02 => Ok(PacketKind::Ping),
            0x03 => Ok(PacketKind::Pong),
            _ => Err(TransportError::protocol(format!("unknown packet kind: {value}"))),
        }
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Application bytes.
    Data(Bytes),
    /// Heartbeat carrying the sender's clock in milliseconds.
    Ping(u64),
    /// Echo of a ping's timestamp.
    Pong(u64),
}

impl Packet {
    /// A ping stamped with the current time.
    pub fn ping_now() -> Self {
        Packet::Ping(unix_millis())
    }

    /// Packet kind.
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Data(_) => PacketKind::Data,
            Packet::Ping(_) => PacketKind::Ping,
            Packet::Pong(_) => PacketKind::Pong,
        }
    }

    /// Reject bodies the peer would refuse.
    pub fn validate(&self) -> Result<(), TransportError> {
        let len = self.body_len();
        if len > MAX_PACKET_BODY {
            return Err(TransportError::protocol(format!(
                "packet body too large: {len} > {MAX_PACKET_BODY}"
            )));
        }
        Ok(())
    }

    /// Append the encoded packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), TransportError> {
        self.validate()?;
        dst.put_u8(self.kind() as u8);
        match self {
            Packet::Data(body) => {
                let len = u32::try_from(body.len())
                    .map_err(|_| TransportError::protocol("packet body exceeds u32"))?;
                dst.put_u32(len);
                dst.put_slice(body);
            }
            Packet::Ping(ts) | Packet::Pong(ts) => {
                dst.put_u32(8);
                dst.put_u64(*ts);
            }
        }
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes, TransportError> {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE + self.body_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    fn body_len(&self) -> usize {
        match self {
            Packet::Data(body) => body.len(),
            Packet::Ping(_) | Packet::Pong(_) => 8,
        }
    }
}

/// Accumulates decrypted stream bytes and yields whole packets.
#[derive(Debug, Default)]
pub struct PacketReader {
    buf: BytesMut,
}

impl PacketReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append decrypted bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered towards the next packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete packet, if one is buffered.
    pub fn next_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        if self.buf.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let kind = PacketKind::try_from(self.buf[0])?;
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > MAX_PACKET_BODY {
            return Err(TransportError::protocol(format!("packet body too large: {len}")));
        }
        if self.buf.len() < PACKET_HEADER_SIZE + len {
            return Ok(None);
        }

        self.buf.advance(PACKET_HEADER_SIZE);
        let mut body = self.buf.split_to(len).freeze();
        let packet = match kind {
            PacketKind::Data => Packet::Data(body),
            PacketKind::Ping | PacketKind::Pong => {
                if len != 8 {
                    return Err(TransportError::protocol(format!(
                        "heartbeat body must be 8 bytes, got {len}"
                    )));
                }
                let ts = body.get_u64();
                if kind == PacketKind::Ping {
                    Packet::Ping(ts)
                } else {
                    Packet::Pong(ts)
                }
            }
        };
        Ok(Some(packet))
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
