//! Reconnect backoff and heartbeat timing.

use std::time::Duration;

/// Timing constants for reconnection and heartbeats.
pub mod constants {
    pub use crate::core::{
        DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_RECONNECT_DELAY, RECONNECT_BACKOFF_MAX,
        RECONNECT_BACKOFF_MIN,
    };

    /// Backoff growth factor per failed attempt.
    pub const BACKOFF_MULTIPLIER: u32 = 2;
}

/// Delay schedule for reconnect attempts.
///
/// The first delay is the configured initial delay; each later one is
/// `min(max(prev * 2, min), max)`. The sequence never decreases and never
/// exceeds the cap.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    min: Duration,
    max: Duration,
    next: Duration,
    attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(
            constants::DEFAULT_RECONNECT_DELAY,
            constants::RECONNECT_BACKOFF_MIN,
            constants::RECONNECT_BACKOFF_MAX,
        )
    }
}

impl ReconnectBackoff {
    /// Create a schedule starting at `initial`, growing from `min` up to `max`.
    pub fn new(initial: Duration, min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            initial: initial.min(max),
            min,
            max,
            next: initial.min(max),
            attempts: 0,
        }
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        let doubled = delay
            .checked_mul(constants::BACKOFF_MULTIPLIER)
            .unwrap_or(self.max);
        self.next = doubled.max(self.min).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Delay the next call to [`ReconnectBackoff::next_delay`] will return.
    pub fn peek(&self) -> Duration {
        self.next
    }

    /// Attempts scheduled so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over after a successful connect.
    pub fn reset(&mut self) {
        self.next = self.initial;
        self.attempts = 0;
    }
}

/// Read and write idle deadlines derived from the heartbeat timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTiming {
    /// Silence after which the peer is considered gone.
    pub read_idle: Duration,
    /// Write idleness after which a ping goes out.
    pub write_idle: Duration,
}

impl HeartbeatTiming {
    /// Client timing: ping at half the timeout.
    pub fn client(timeout: Duration) -> Self {
        Self {
            read_idle: timeout,
            write_idle: timeout / 2,
        }
    }
}
