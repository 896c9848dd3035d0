//! Legacy stream ciphers.
//!
//! No tag and no framing: the keystream runs continuously across calls, so
//! output length always equals input length and call boundaries do not
//! matter.

use aes::{Aes128, Aes192, Aes256};
use blowfish::Blowfish;
use cfb_mode::cipher::consts::U16;
use cfb_mode::cipher::{
    BlockCipher, BlockEncryptMut, InnerIvInit, KeyInit, KeyIvInit, StreamCipher,
};
use cfb_mode::{BufDecryptor, BufEncryptor};
use chacha20::{ChaCha20, ChaCha20Legacy};
use ofb::Ofb;
use rc4::Rc4;

use super::keys::{rc4_md5_key, SecretKey};
use super::nonce::Direction;
use super::suite::CipherKind;
use crate::core::CryptoError;

trait Keystream: Send {
    fn apply(&mut self, buf: &mut [u8]) -> Result<(), CryptoError>;
}

/// Ciphers where encryption and decryption are the same XOR.
struct Symmetric<C>(C);

impl<C: StreamCipher + Send> Keystream for Symmetric<C> {
    fn apply(&mut self, buf: &mut [u8]) -> Result<(), CryptoError> {
        self.0
            .try_apply_keystream(buf)
            .map_err(|_| CryptoError::KeystreamExhausted)
    }
}

struct CfbEncrypt<C: BlockEncryptMut + BlockCipher>(BufEncryptor<C>);

impl<C: BlockEncryptMut + BlockCipher + Send> Keystream for CfbEncrypt<C> {
    fn apply(&mut self, buf: &mut [u8]) -> Result<(), CryptoError> {
        self.0.encrypt(buf);
        Ok(())
    }
}

struct CfbDecrypt<C: BlockEncryptMut + BlockCipher>(BufDecryptor<C>);

impl<C: BlockEncryptMut + BlockCipher + Send> Keystream for CfbDecrypt<C> {
    fn apply(&mut self, buf: &mut [u8]) -> Result<(), CryptoError> {
        self.0.decrypt(buf);
        Ok(())
    }
}

struct Passthrough;

impl Keystream for Passthrough {
    fn apply(&mut self, _buf: &mut [u8]) -> Result<(), CryptoError> {
        Ok(())
    }
}

fn cfb<C>(key: &[u8], iv: &[u8], direction: Direction) -> Result<Box<dyn Keystream>, CryptoError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit + Send + 'static,
{
    let cipher = C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
    let bad_iv = |_| CryptoError::InvalidSaltLength {
        expected: C::block_size(),
        actual: iv.len(),
    };
    Ok(match direction {
        Direction::Encrypt => Box::new(CfbEncrypt(
            BufEncryptor::<C>::inner_iv_slice_init(cipher, iv).map_err(bad_iv)?,
        )),
        Direction::Decrypt => Box::new(CfbDecrypt(
            BufDecryptor::<C>::inner_iv_slice_init(cipher, iv).map_err(bad_iv)?,
        )),
    })
}

fn symmetric<C>(key: &[u8], iv: &[u8]) -> Result<Box<dyn Keystream>, CryptoError>
where
    C: KeyIvInit + StreamCipher + Send + 'static,
{
    let cipher = C::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(Box::new(Symmetric(cipher)))
}

/// A stream cipher positioned somewhere in its keystream.
pub struct StreamTransform {
    kind: CipherKind,
    keystream: Box<dyn Keystream>,
}

impl StreamTransform {
    /// Key a stream cipher with the master key and the session IV.
    pub fn new(
        kind: CipherKind,
        master: &SecretKey,
        iv: &[u8],
        direction: Direction,
    ) -> Result<Self, CryptoError> {
        if iv.len() != kind.salt_len() {
            return Err(CryptoError::InvalidSaltLength {
                expected: kind.salt_len(),
                actual: iv.len(),
            });
        }

        let key = master.as_bytes();
        let keystream = match kind {
            CipherKind::Plain => Box::new(Passthrough) as Box<dyn Keystream>,
            CipherKind::Aes128Cfb => cfb::<Aes128>(key, iv, direction)?,
            CipherKind::Aes192Cfb => cfb::<Aes192>(key, iv, direction)?,
            CipherKind::Aes256Cfb => cfb::<Aes256>(key, iv, direction)?,
            CipherKind::BlowfishCfb => cfb::<Blowfish>(key, iv, direction)?,
            CipherKind::Aes128Ofb => symmetric::<Ofb<Aes128>>(key, iv)?,
            CipherKind::Aes192Ofb => symmetric::<Ofb<Aes192>>(key, iv)?,
            CipherKind::Aes256Ofb => symmetric::<Ofb<Aes256>>(key, iv)?,
            CipherKind::ChaCha20 => symmetric::<ChaCha20Legacy>(key, iv)?,
            CipherKind::ChaCha20Ietf => symmetric::<ChaCha20>(key, iv)?,
            CipherKind::Rc4Md5 => {
                let session = rc4_md5_key(master, iv);
                let cipher = Rc4::<U16>::new_from_slice(session.as_bytes())
                    .map_err(|_| CryptoError::InvalidKeyLength)?;
                Box::new(Symmetric(cipher))
            }
            other => return Err(CryptoError::UnsupportedCipher(other.name().to_string())),
        };

        Ok(Self { kind, keystream })
    }

    /// The cipher method.
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Transform `data`, continuing the keystream from the previous call.
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = data.to_vec();
        self.keystream.apply(&mut out)?;
        Ok(out)
    }
}

impl std::fmt::Debug for StreamTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransform")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::evp_bytes_to_key;

    fn stream_kinds() -> impl Iterator<Item = CipherKind> {
        CipherKind::ALL.iter().copied().filter(|k| !k.is_aead())
    }

    fn pair(kind: CipherKind) -> (StreamTransform, StreamTransform) {
        let master = evp_bytes_to_key(b"stream-secret", kind.key_len());
        let iv = vec![0x11u8; kind.salt_len()];
        (
            StreamTransform::new(kind, &master, &iv, Direction::Encrypt).unwrap(),
            StreamTransform::new(kind, &master, &iv, Direction::Decrypt).unwrap(),
        )
    }

    #[test]
    fn test_round_trip_all_stream_kinds() {
        let plaintext: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        for kind in stream_kinds() {
            let (mut enc, mut dec) = pair(kind);
            let ciphertext = enc.process(&plaintext).unwrap();
            assert_eq!(ciphertext.len(), plaintext.len(), "{kind}");
            if kind != CipherKind::Plain {
                assert_ne!(ciphertext, plaintext, "{kind}");
            }
            assert_eq!(dec.process(&ciphertext).unwrap(), plaintext, "{kind}");
        }
    }

    #[test]
    fn test_keystream_continues_across_calls() {
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        for kind in stream_kinds() {
            let (mut whole, _) = pair(kind);
            let (mut split, _) = pair(kind);

            let expected = whole.process(plaintext).unwrap();
            let mut actual = split.process(&plaintext[..5]).unwrap();
            actual.extend(split.process(&plaintext[5..17]).unwrap());
            actual.extend(split.process(&plaintext[17..]).unwrap());
            assert_eq!(actual, expected, "{kind}");
        }
    }

    #[test]
    fn test_decrypt_in_odd_pieces() {
        let plaintext = vec![0x5Au8; 97];
        for kind in stream_kinds() {
            let (mut enc, mut dec) = pair(kind);
            let ciphertext = enc.process(&plaintext).unwrap();
            let mut out = Vec::new();
            for piece in ciphertext.chunks(7) {
                out.extend(dec.process(piece).unwrap());
            }
            assert_eq!(out, plaintext, "{kind}");
        }
    }

    #[test]
    fn test_wrong_iv_length() {
        let master = evp_bytes_to_key(b"k", 16);
        let err = StreamTransform::new(CipherKind::Aes128Cfb, &master, &[0u8; 8], Direction::Encrypt)
            .unwrap_err();
        assert_eq!(err, CryptoError::InvalidSaltLength { expected: 16, actual: 8 });
    }

    #[test]
    fn test_rc4_md5_depends_on_iv() {
        let master = evp_bytes_to_key(b"k", 16);
        let mut a = StreamTransform::new(CipherKind::Rc4Md5, &master, &[1u8; 16], Direction::Encrypt)
            .unwrap();
        let mut b = StreamTransform::new(CipherKind::Rc4Md5, &master, &[2u8; 16], Direction::Encrypt)
            .unwrap();
        assert_ne!(a.process(b"same").unwrap(), b.process(b"same").unwrap());
    }
}
