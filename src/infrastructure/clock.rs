//! Clock and ID-minter implementations.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;
use uuid::Uuid;

use crate::domain::ports::{Clock, IdMinter};

/// Production clock backed by the operating system.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn mono(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic clock for tests: wall time only moves when `advance` or
/// `set` is called.
pub struct VirtualClock {
    /// Microseconds since the Unix epoch
    now_micros: AtomicI64,
    /// Anchor for monotonic readings
    origin: Instant,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now_micros: AtomicI64::new(start.timestamp_micros()),
            origin: Instant::now(),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let micros = by.num_microseconds().unwrap_or(i64::MAX);
        self.now_micros.fetch_add(micros, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        self.now_micros.store(to.timestamp_micros(), Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.now_micros.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }

    fn mono(&self) -> Instant {
        self.origin
    }
}

/// Production ID minter: random v4 UUIDs.
pub struct UuidMinter;

impl IdMinter for UuidMinter {
    fn mint(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic minter for tests: sequential IDs from a fixed prefix.
pub struct SequentialMinter {
    counter: AtomicI64,
}

impl SequentialMinter {
    pub fn new() -> Self {
        Self {
            counter: AtomicI64::new(1),
        }
    }
}

impl Default for SequentialMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl IdMinter for SequentialMinter {
    fn mint(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) as u64;
        Uuid::from_u64_pair(0xF1A6_0000_0000_0000, n)
    }
}
