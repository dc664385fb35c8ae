//! Time source used for entity timestamps and staleness checks.

use chrono::{DateTime, Utc};

/// Source of the current time.
///
/// Staleness decisions compare timestamps against [`Clock::now`], so tests
/// substitute a clock they can move by hand.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
