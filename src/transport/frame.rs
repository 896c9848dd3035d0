//! TCP frame assembly.
//!
//! AEAD streams are a salt followed by chunks:
//!
//! ```text
//! ┌──────┬─────────────────────────┬──────────────────────────────┬─────
//! │ salt │ len (2, BE) │ tag (16)  │ payload (len) │ tag (16)     │ ...
//! └──────┴─────────────────────────┴──────────────────────────────┴─────
//! ```
//!
//! The length and the payload are sealed separately, each with its own
//! nonce. Stream ciphers send the IV and then raw ciphertext.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::TransportError;
use crate::core::{CHUNK_LENGTH_SIZE, CHUNK_SIZE_MASK};
use crate::crypto::{random_bytes, CipherCodec, CipherSuite, Direction};

/// Splits outbound plaintext into sealed chunks.
#[derive(Debug)]
pub struct FrameEncoder {
    codec: CipherCodec,
    pending_salt: Option<Vec<u8>>,
    max_chunk: usize,
}

impl FrameEncoder {
    /// Create an encoder with a fresh random salt.
    ///
    /// `max_chunk` is clamped to `1..=0x3FFF`.
    pub fn new(suite: &CipherSuite, max_chunk: usize) -> Result<Self, TransportError> {
        let salt = random_bytes(suite.salt_len());
        Self::with_salt(suite, salt, max_chunk)
    }

    /// Create an encoder with a caller-chosen salt.
    pub fn with_salt(
        suite: &CipherSuite,
        salt: Vec<u8>,
        max_chunk: usize,
    ) -> Result<Self, TransportError> {
        let codec = CipherCodec::init(suite, Direction::Encrypt, &salt)?;
        Ok(Self {
            codec,
            pending_salt: (!salt.is_empty()).then_some(salt),
            max_chunk: max_chunk.clamp(1, CHUNK_SIZE_MASK),
        })
    }

    /// Effective chunk size.
    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Encode `plaintext`; the first call also emits the salt.
    pub fn encode(&mut self, plaintext: &[u8]) -> Result<Bytes, TransportError> {
        let mut out = BytesMut::with_capacity(self.encoded_len(plaintext.len()));
        if let Some(salt) = self.pending_salt.take() {
            out.put_slice(&salt);
        }

        if !self.codec.is_aead() {
            out.put_slice(&self.codec.process_chunk(plaintext)?);
            return Ok(out.freeze());
        }

        for chunk in plaintext.chunks(self.max_chunk) {
            let len = (chunk.len() as u16).to_be_bytes();
            out.put_slice(&self.codec.process_chunk(&len)?);
            out.put_slice(&self.codec.process_chunk(chunk)?);
        }
        Ok(out.freeze())
    }

    /// Bytes that encoding `len` plaintext bytes will produce.
    pub fn encoded_len(&self, len: usize) -> usize {
        let salt = self.pending_salt.as_ref().map_or(0, Vec::len);
        if !self.codec.is_aead() {
            return salt + len;
        }
        let chunks = len.div_ceil(self.max_chunk);
        let tag = self.codec.overhead();
        salt + len + chunks * (CHUNK_LENGTH_SIZE + 2 * tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingSalt,
    Streaming,
    AwaitingLength,
    AwaitingPayload(usize),
    Poisoned,
}

/// Reassembles inbound bytes into plaintext.
///
/// Input may be split anywhere; decoded output is identical no matter how
/// the stream was cut. After the first failure the decoder rejects all
/// further input.
#[derive(Debug)]
pub struct FrameDecoder {
    suite: CipherSuite,
    codec: Option<CipherCodec>,
    buf: BytesMut,
    state: DecodeState,
}

impl FrameDecoder {
    /// Create a decoder waiting for the peer's salt.
    pub fn new(suite: CipherSuite) -> Self {
        Self {
            suite,
            codec: None,
            buf: BytesMut::new(),
            state: DecodeState::AwaitingSalt,
        }
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True once a failure has poisoned the decoder.
    pub fn is_poisoned(&self) -> bool {
        self.state == DecodeState::Poisoned
    }

    /// Feed received bytes; returns every plaintext byte completed by them.
    pub fn decode(&mut self, data: &[u8]) -> Result<Bytes, TransportError> {
        if self.is_poisoned() {
            return Err(TransportError::protocol("stream already failed"));
        }

        self.buf.extend_from_slice(data);
        let mut out = BytesMut::new();
        match self.drain(&mut out) {
            Ok(()) => Ok(out.freeze()),
            Err(e) => {
                self.state = DecodeState::Poisoned;
                self.buf.clear();
                Err(e)
            }
        }
    }

    fn drain(&mut self, out: &mut BytesMut) -> Result<(), TransportError> {
        loop {
            match self.state {
                DecodeState::AwaitingSalt => {
                    let salt_len = self.suite.salt_len();
                    if self.buf.len() < salt_len {
                        return Ok(());
                    }
                    let salt = self.buf.split_to(salt_len);
                    let codec = CipherCodec::init(&self.suite, Direction::Decrypt, &salt)?;
                    self.state = if codec.is_aead() {
                        DecodeState::AwaitingLength
                    } else {
                        DecodeState::Streaming
                    };
                    self.codec = Some(codec);
                }
                DecodeState::Streaming => {
                    if self.buf.is_empty() {
                        return Ok(());
                    }
                    let data = self.buf.split();
                    out.put_slice(&self.codec_mut()?.process_chunk(&data)?);
                }
                DecodeState::AwaitingLength => {
                    let codec = self.codec_mut()?;
                    let need = CHUNK_LENGTH_SIZE + codec.overhead();
                    if self.buf.len() < need {
                        return Ok(());
                    }
                    let segment = self.buf.split_to(need);
                    let plain = self.codec_mut()?.process_chunk(&segment)?;
                    let len = u16::from_be_bytes([plain[0], plain[1]]) as usize;
                    if len == 0 || len > CHUNK_SIZE_MASK {
                        return Err(TransportError::protocol(format!(
                            "invalid chunk length {len}"
                        )));
                    }
                    self.state = DecodeState::AwaitingPayload(len);
                }
                DecodeState::AwaitingPayload(len) => {
                    let need = len + self.codec_mut()?.overhead();
                    if self.buf.len() < need {
                        return Ok(());
                    }
                    let segment = self.buf.split_to(need);
                    out.put_slice(&self.codec_mut()?.process_chunk(&segment)?);
                    self.state = DecodeState::AwaitingLength;
                }
                DecodeState::Poisoned => {
                    return Err(TransportError::protocol("stream already failed"));
                }
            }
        }
    }

    fn codec_mut(&mut self) -> Result<&mut CipherCodec, TransportError> {
        self.codec
            .as_mut()
            .ok_or_else(|| TransportError::protocol("codec used before salt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AEAD_TAG_SIZE, CryptoError};
    use crate::crypto::CipherKind;
    use proptest::prelude::*;

    fn suite(kind: CipherKind) -> CipherSuite {
        CipherSuite::new(kind, "frame-test")
    }

    #[test]
    fn test_scenario_20000_bytes_aes_256_gcm() {
        let suite = suite(CipherKind::Aes256Gcm);
        let mut encoder = FrameEncoder::new(&suite, 16384).unwrap();
        assert_eq!(encoder.max_chunk(), CHUNK_SIZE_MASK);

        let plaintext: Vec<u8> = (0..20000u32).map(|i| (i * 7) as u8).collect();
        let wire = encoder.encode(&plaintext).unwrap();

        // salt + 2 chunks, each two independently tagged segments
        let expected = 32 + 2 * (2 + AEAD_TAG_SIZE) + 20000 + 2 * AEAD_TAG_SIZE;
        assert_eq!(wire.len(), expected);

        let mut decoder = FrameDecoder::new(suite);
        assert_eq!(&decoder.decode(&wire).unwrap()[..], &plaintext[..]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_encoded_len_matches() {
        for kind in CipherKind::ALL {
            let mut encoder = FrameEncoder::new(&suite(*kind), 1000).unwrap();
            for len in [0usize, 1, 999, 1000, 1001, 5000] {
                let predicted = encoder.encoded_len(len);
                assert_eq!(encoder.encode(&vec![1u8; len]).unwrap().len(), predicted, "{kind}");
            }
        }
    }

    #[test]
    fn test_salt_only_sent_once() {
        let suite = suite(CipherKind::Aes128Gcm);
        let mut encoder = FrameEncoder::new(&suite, 100).unwrap();
        let first = encoder.encode(b"x").unwrap();
        let second = encoder.encode(b"x").unwrap();
        assert_eq!(first.len(), 16 + 2 + 16 + 1 + 16);
        assert_eq!(second.len(), 2 + 16 + 1 + 16);
    }

    #[test]
    fn test_multiple_chunks_per_read() {
        let suite = suite(CipherKind::ChaCha20Poly1305);
        let mut encoder = FrameEncoder::new(&suite, 10).unwrap();
        let mut wire = encoder.encode(b"hello ").unwrap().to_vec();
        wire.extend_from_slice(&encoder.encode(b"world, this spans chunks").unwrap());

        let mut decoder = FrameDecoder::new(suite);
        assert_eq!(
            &decoder.decode(&wire).unwrap()[..],
            b"hello world, this spans chunks"
        );
    }

    #[test]
    fn test_tampered_chunk_poisons_decoder() {
        let suite = suite(CipherKind::Aes256Gcm);
        let mut encoder = FrameEncoder::new(&suite, 100).unwrap();
        let mut wire = encoder.encode(b"some payload").unwrap().to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0x80;

        let mut decoder = FrameDecoder::new(suite);
        let err = decoder.decode(&wire).unwrap_err();
        assert!(matches!(err, TransportError::Crypto(CryptoError::DecryptionFailed)));
        assert!(err.is_fatal());
        assert!(decoder.is_poisoned());
        assert!(decoder.decode(&[]).is_err());
    }

    #[test]
    fn test_zero_length_chunk_rejected() {
        let suite = suite(CipherKind::Aes128Gcm);
        let salt = vec![3u8; 16];
        let mut codec = CipherCodec::init(&suite, Direction::Encrypt, &salt).unwrap();
        let mut wire = salt.clone();
        wire.extend(codec.process_chunk(&0u16.to_be_bytes()).unwrap());

        let mut decoder = FrameDecoder::new(suite);
        assert!(matches!(decoder.decode(&wire), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let suite = suite(CipherKind::Aes128Gcm);
        let salt = vec![4u8; 16];
        let mut codec = CipherCodec::init(&suite, Direction::Encrypt, &salt).unwrap();
        let mut wire = salt.clone();
        wire.extend(codec.process_chunk(&0x4000u16.to_be_bytes()).unwrap());

        let mut decoder = FrameDecoder::new(suite);
        assert!(matches!(decoder.decode(&wire), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_partial_salt_waits() {
        let suite = suite(CipherKind::Aes256Gcm);
        let mut encoder = FrameEncoder::new(&suite, 100).unwrap();
        let wire = encoder.encode(b"abc").unwrap();

        let mut decoder = FrameDecoder::new(suite);
        assert!(decoder.decode(&wire[..10]).unwrap().is_empty());
        assert_eq!(&decoder.decode(&wire[10..]).unwrap()[..], b"abc");
    }

    fn arb_kind() -> impl Strategy<Value = CipherKind> {
        proptest::sample::select(CipherKind::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_split_reads_match_whole(
            kind in arb_kind(),
            data in prop::collection::vec(any::<u8>(), 0..40_000),
            max_chunk in 1usize..20_000,
            window in 1usize..4096,
        ) {
            let suite = suite(kind);
            let mut encoder = FrameEncoder::new(&suite, max_chunk).unwrap();
            let wire = encoder.encode(&data).unwrap();

            let mut whole = FrameDecoder::new(suite.clone());
            let whole_out = whole.decode(&wire).unwrap();

            let mut pieces = FrameDecoder::new(suite);
            let mut piece_out = Vec::new();
            for piece in wire.chunks(window) {
                piece_out.extend_from_slice(&pieces.decode(piece).unwrap());
            }

            prop_assert_eq!(&whole_out[..], &data[..]);
            prop_assert_eq!(piece_out, data);
        }
    }

    #[test]
    fn test_one_megabyte_every_cipher() {
        let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i * 31 + i / 251) as u8).collect();
        for kind in CipherKind::ALL {
            let suite = suite(*kind);
            let mut encoder = FrameEncoder::new(&suite, CHUNK_SIZE_MASK).unwrap();
            let wire = encoder.encode(&data).unwrap();
            assert_eq!(wire.len(), encoder.encoded_len(data.len()), "{kind}");

            let mut whole = FrameDecoder::new(suite.clone());
            assert_eq!(&whole.decode(&wire).unwrap()[..], &data[..], "{kind}");

            // Uneven windows that straddle salt, length and payload segments.
            let mut pieces = FrameDecoder::new(suite);
            let mut out = Vec::with_capacity(data.len());
            let mut rest = &wire[..];
            for window in [1usize, 7, 33, 4096, 65_537].iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let (piece, tail) = rest.split_at((*window).min(rest.len()));
                out.extend_from_slice(&pieces.decode(piece).unwrap());
                rest = tail;
            }
            assert_eq!(out, data, "{kind}");
            assert_eq!(pieces.buffered(), 0);
        }
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let suite = suite(CipherKind::XChaCha20Poly1305);
        let mut encoder = FrameEncoder::new(&suite, 300).unwrap();
        let data: Vec<u8> = (0..2000u32).map(|i| i as u8).collect();
        let wire = encoder.encode(&data).unwrap();

        let mut decoder = FrameDecoder::new(suite);
        let mut out = Vec::new();
        for byte in wire.iter() {
            out.extend_from_slice(&decoder.decode(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(out, data);
    }
}
