//! Encrypted packet I/O over a TCP stream.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::error::TransportError;
use super::frame::{FrameDecoder, FrameEncoder};
use super::packet::{Packet, PacketReader};
use crate::core::READ_BUFFER_SIZE;
use crate::crypto::CipherSuite;

/// Split a stream into an encrypted packet reader and writer.
pub fn framed(
    stream: TcpStream,
    suite: &CipherSuite,
    max_chunk: usize,
) -> Result<(FramedReader, FramedWriter), TransportError> {
    stream.set_nodelay(true)?;
    let local = stream.local_addr()?;
    let peer = stream.peer_addr()?;
    let (read, write) = stream.into_split();

    let reader = FramedReader {
        inner: read,
        decoder: FrameDecoder::new(suite.clone()),
        packets: PacketReader::new(),
        buf: vec![0u8; READ_BUFFER_SIZE],
    };
    let writer = FramedWriter {
        inner: write,
        encoder: FrameEncoder::new(suite, max_chunk)?,
        local,
        peer,
    };
    Ok((reader, writer))
}

/// Reads and decrypts packets.
#[derive(Debug)]
pub struct FramedReader {
    inner: OwnedReadHalf,
    decoder: FrameDecoder,
    packets: PacketReader,
    buf: Vec<u8>,
}

impl FramedReader {
    /// Next packet, or `None` once the peer closed the stream.
    ///
    /// Cancel safe: bytes read before cancellation stay buffered.
    pub async fn recv(&mut self) -> Result<Option<Packet>, TransportError> {
        loop {
            if let Some(packet) = self.packets.next_packet()? {
                return Ok(Some(packet));
            }

            let n = self.inner.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            let plain = self.decoder.decode(&self.buf[..n])?;
            self.packets.push(&plain);
        }
    }
}

/// Encrypts and writes packets.
#[derive(Debug)]
pub struct FramedWriter {
    inner: OwnedWriteHalf,
    encoder: FrameEncoder,
    local: SocketAddr,
    peer: SocketAddr,
}

impl FramedWriter {
    /// Encode and flush one packet.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let mut plain = BytesMut::new();
        packet.encode(&mut plain)?;
        let wire = self.encoder.encode(&plain)?;
        self.inner.write_all(&wire).await?;
        Ok(())
    }

    /// Send FIN.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Local socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Remote socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherKind;
    use bytes::Bytes;
    use tokio::net::TcpListener;

    async fn pair(suite: &CipherSuite) -> ((FramedReader, FramedWriter), (FramedReader, FramedWriter)) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (
            framed(client.unwrap(), suite, 1024).unwrap(),
            framed(accepted.unwrap().0, suite, 1024).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_packets_cross_the_wire() {
        let suite = CipherSuite::new(CipherKind::Aes256Gcm, "stream-test");
        let ((_, mut client_tx), (mut server_rx, _)) = pair(&suite).await;

        let big = Bytes::from(vec![0xA5u8; 5000]);
        client_tx.send(&Packet::Data(Bytes::from_static(b"hello"))).await.unwrap();
        client_tx.send(&Packet::Ping(99)).await.unwrap();
        client_tx.send(&Packet::Data(big.clone())).await.unwrap();

        assert_eq!(
            server_rx.recv().await.unwrap(),
            Some(Packet::Data(Bytes::from_static(b"hello")))
        );
        assert_eq!(server_rx.recv().await.unwrap(), Some(Packet::Ping(99)));
        assert_eq!(server_rx.recv().await.unwrap(), Some(Packet::Data(big)));
    }

    #[tokio::test]
    async fn test_eof_yields_none() {
        let suite = CipherSuite::new(CipherKind::ChaCha20Poly1305, "stream-test");
        let ((_, mut client_tx), (mut server_rx, _)) = pair(&suite).await;
        client_tx.shutdown().await.unwrap();
        assert_eq!(server_rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_password_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());

        let good = CipherSuite::new(CipherKind::Aes128Gcm, "right");
        let bad = CipherSuite::new(CipherKind::Aes128Gcm, "wrong");
        let (_, mut tx) = framed(client.unwrap(), &good, 1024).unwrap();
        let (mut rx, _) = framed(accepted.unwrap().0, &bad, 1024).unwrap();

        tx.send(&Packet::Data(Bytes::from_static(b"secret"))).await.unwrap();
        let err = rx.recv().await.unwrap_err();
        assert!(err.is_fatal());
    }
}
