//! Clock and ID-minting ports.
//!
//! Every time-dependent decision reads time through this port so tests
//! can substitute a virtual clock that advances deterministically. Task
//! ticking stays on the runtime's own timer; only *domain* time (when
//! does a timer fire, is a window active, has a cooldown elapsed) goes
//! through the port.

use chrono::{DateTime, Utc};
use std::time::Instant;
use uuid::Uuid;

/// Time source: wall clock and monotonic clock.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic instant for duration measurement.
    fn mono(&self) -> Instant;
}

/// Collision-resistant identifier minting.
///
/// A trait rather than bare `Uuid::new_v4()` calls so tests can mint
/// predictable, sequence-numbered IDs.
pub trait IdMinter: Send + Sync {
    fn mint(&self) -> Uuid;
}
