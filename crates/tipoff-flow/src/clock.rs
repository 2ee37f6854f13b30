//! Time sources for lease bookkeeping.
//!
//! Ledgers stamp lease grants, failures and retry deadlines from their own
//! [`Clock`], independent of the `as_of` a tick is evaluated at. A back-dated
//! operator run therefore cannot create a lease that already looks stale to a
//! concurrent timer tick.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    base: DateTime<Utc>,
    /// Milliseconds past `base`; may be negative after [`ManualClock::set`].
    offset_ms: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `base`.
    #[must_use]
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Moves the clock to `at`, forwards or backwards.
    pub fn set(&self, at: DateTime<Utc>) {
        self.offset_ms
            .store((at - self.base).num_milliseconds(), Ordering::SeqCst);
    }

    /// Advances the clock by `by`.
    pub fn advance(&self, by: Duration) {
        let ms = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst));
        self.base
            .checked_add_signed(offset)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
