//! Cipher codec.
//!
//! Two families share one interface:
//!
//! - **AEAD** ([`AeadTransform`]): AES-GCM, ChaCha20-Poly1305 and
//!   XChaCha20-Poly1305 with HKDF-SHA1 session subkeys and per-direction
//!   little-endian nonce counters.
//! - **Stream** ([`StreamTransform`]): RC4-MD5, Blowfish-CFB, AES-CFB/OFB and
//!   ChaCha20; no tag, continuous keystream.
//!
//! [`CipherCodec`] picks one from a [`CipherSuite`] and a direction.
//!
//! ```text
//! password ──EVP_BytesToKey──► master key ──HKDF-SHA1(salt)──► subkey ──► AEAD
//!                                   └───────────────(IV)────────────────► stream
//! ```

mod aead;
mod codec;
mod keys;
mod nonce;
mod stream;
mod suite;

pub use aead::AeadTransform;
pub use codec::{CipherCodec, Transform};
pub use keys::{derive_subkey, evp_bytes_to_key, random_bytes, rc4_md5_key, SecretKey};
pub use nonce::{Direction, Nonce, NonceCounter};
pub use stream::StreamTransform;
pub use suite::{CipherKind, CipherSuite};
