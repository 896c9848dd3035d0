//! Connection pool.
//!
//! Keeps warm [`StatefulClient`](crate::client::StatefulClient)s per server
//! endpoint so request/response callers can borrow a connected socket instead
//! of dialing each time.
//!
//! - Borrow is LIFO over idle connections and validates each candidate
//! - Returned connections are passivated (handlers cleared, auto-reconnect
//!   off) before going idle
//! - `max_total` bounds live connections per key; borrowers wait up to the
//!   borrow timeout and then fail with [`PoolError::Exhausted`]
//! - A periodic sweep evicts idle connections and tops up `min_idle`

mod config;
mod error;
#[allow(clippy::module_inception)]
mod pool;

pub use config::*;
pub use error::*;
pub use pool::*;
