//! Time sources for backoff decisions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// ```
/// use chrono::{TimeDelta, Utc};
/// use edge_reconcile::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(Utc::now());
/// let before = clock.utc_now();
/// clock.advance(TimeDelta::seconds(3));
/// assert_eq!(clock.utc_now() - before, TimeDelta::seconds(3));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::TimeDelta) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn utc_now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
