//! Reliable UDP channel.
//!
//! Datagrams carry an id and an [`AckMode`]. The sender keeps each
//! acknowledged-mode message pending and resends it until the matching ack
//! arrives or the resend budget runs out. The receiver remembers ids for the
//! message's alive window, so a resent copy is re-acked instead of being
//! delivered twice.
//!
//! ```text
//! sender                                  receiver
//!   │── data{id, FULL} ───────────────────►│ deliver to handlers
//!   │── data{id, FULL} (resend) ──────────►│ still in flight: drop
//!   │◄───────────────────────── ack{id} ───│ handlers ok: ack
//!   │── data{id, FULL} (late resend) ─────►│ consumed: re-ack only
//! ```

mod channel;
mod dedup;
mod error;
mod message;

pub use channel::*;
pub use dedup::{Admission, DedupTable};
pub use error::*;
pub use message::*;
