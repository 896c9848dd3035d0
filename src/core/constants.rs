//! Wire constants and configuration defaults.
//!
//! Wire values are fixed by the Shadowsocks framing and MUST NOT be changed.
//! Defaults may be overridden through the per-component configuration types.

use std::time::Duration;

// =============================================================================
// CIPHER CONSTANTS
// =============================================================================

/// Authentication tag size for every supported AEAD cipher.
pub const AEAD_TAG_SIZE: usize = 16;

/// IETF nonce size (AES-GCM, ChaCha20-Poly1305).
pub const AEAD_NONCE_SIZE: usize = 12;

/// Extended nonce size (XChaCha20-Poly1305).
pub const XAEAD_NONCE_SIZE: usize = 24;

/// Largest key any supported cipher uses.
pub const MAX_KEY_SIZE: usize = 32;

/// HKDF info string for per-session subkeys.
pub const SUBKEY_INFO: &[u8] = b"ss-subkey";

// =============================================================================
// FRAMING
// =============================================================================

/// Maximum plaintext bytes in one TCP chunk.
pub const CHUNK_SIZE_MASK: usize = 0x3FFF;

/// Size of the big-endian chunk length prefix.
pub const CHUNK_LENGTH_SIZE: usize = 2;

/// Packet header size (kind + body length).
pub const PACKET_HEADER_SIZE: usize = 5;

/// Upper bound on a single packet body.
pub const MAX_PACKET_BODY: usize = 16 * 1024 * 1024;

/// Socket read buffer for stream connections.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

// =============================================================================
// CLIENT DEFAULTS
// =============================================================================

/// Time allowed for a connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `send` waits for an in-progress reconnect.
pub const DEFAULT_SEND_WAIT: Duration = Duration::from_millis(5000);

/// Delay before the first reconnect attempt after a drop.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Floor of the reconnect backoff.
pub const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(100);

/// Cap of the reconnect backoff.
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_millis(5000);

/// Read-idle threshold; pings go out after half of it without writes.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// SERVER DEFAULTS
// =============================================================================

/// Peers accepted before new sockets are force-closed.
pub const DEFAULT_SERVER_CAPACITY: usize = 1_000_000;

// =============================================================================
// RELIABLE UDP DEFAULTS
// =============================================================================

/// Total time the sender waits for an ack.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(15000);

/// Resends before the send fails.
pub const DEFAULT_MAX_RESEND: u32 = 2;

/// How long a receiver remembers a consumed message id.
pub const DEFAULT_MESSAGE_ALIVE: Duration = Duration::from_secs(60);

/// UDP receive buffer.
pub const UDP_RECV_BUFFER_SIZE: usize = 65535;

/// Datagrams above this size are likely to fragment.
pub const UDP_LARGE_PACKET_WARN: usize = 1024;

/// Interval of the dedup record sweep.
pub const DEDUP_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// POOL DEFAULTS
// =============================================================================

/// Idle connections kept warm per key.
pub const DEFAULT_POOL_MIN_IDLE: usize = 0;

/// Idle connections retained per key.
pub const DEFAULT_POOL_MAX_IDLE: usize = 8;

/// Live connections per key.
pub const DEFAULT_POOL_MAX_TOTAL: usize = 8;

/// Borrow wait, also used as the connect timeout for new connections.
pub const DEFAULT_BORROW_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connections older than this are evicted.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Period of the eviction sweep.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_millis(30_000);
