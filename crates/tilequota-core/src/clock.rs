//! Time source used for page access times and blending.
//!
//! Statistics are kept at minute resolution. Components take an
//! `Arc<dyn Clock>` so tests can pin and advance time deterministically.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds in one minute.
pub const MILLIS_PER_MINUTE: i64 = 60_000;

/// A source of wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Whole minutes since the Unix epoch.
    fn current_time_minutes(&self) -> i64 {
        self.now_millis().div_euclid(MILLIS_PER_MINUTE)
    }
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A manually driven clock for tests and replay tooling.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at the given epoch milliseconds.
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Create a clock frozen at the start of the given epoch minute.
    pub fn at_minute(minute: i64) -> Self {
        Self::new(minute * MILLIS_PER_MINUTE)
    }

    /// Set the current time.
    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward by whole minutes.
    pub fn advance_minutes(&self, minutes: i64) {
        self.millis
            .fetch_add(minutes * MILLIS_PER_MINUTE, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
