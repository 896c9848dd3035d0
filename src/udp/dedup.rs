//! Receiver-side duplicate suppression.

use std::net::SocketAddr;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

/// What to do with an incoming message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting; process it.
    Fresh,
    /// Still being processed; drop the copy.
    InFlight,
    /// Already processed; re-ack without delivering.
    Consumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    InFlight,
    Consumed,
}

#[derive(Debug)]
struct Record {
    stage: Stage,
    expires_at: Instant,
}

/// Message ids seen recently, keyed by sender.
#[derive(Debug, Default)]
pub struct DedupTable {
    records: DashMap<(SocketAddr, u64), Record>,
}

impl DedupTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no ids are remembered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Classify an id and, if fresh, remember it as in flight for `alive`.
    pub fn admit(&self, from: SocketAddr, id: u64, alive: Duration) -> Admission {
        let now = Instant::now();
        let record = Record {
            stage: Stage::InFlight,
            expires_at: now + alive,
        };

        match self.records.entry((from, id)) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at <= now {
                    entry.insert(record);
                    return Admission::Fresh;
                }
                match entry.get().stage {
                    Stage::InFlight => Admission::InFlight,
                    Stage::Consumed => Admission::Consumed,
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                Admission::Fresh
            }
        }
    }

    /// Mark an id processed; it is remembered for another `alive`.
    pub fn complete(&self, from: SocketAddr, id: u64, alive: Duration) {
        self.records.insert(
            (from, id),
            Record {
                stage: Stage::Consumed,
                expires_at: Instant::now() + alive,
            },
        );
    }

    /// Drop an id so a resend is processed again.
    pub fn forget(&self, from: SocketAddr, id: u64) {
        self.records.remove(&(from, id));
    }

    /// Remove expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        before.saturating_sub(self.records.len())
    }
}
