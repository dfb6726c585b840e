//! Injectable time source
//!
//! All timestamps in the system are local wall-clock instants in the
//! deployment's single time zone. Every logical operation (a recognize
//! request, a scheduler tick, a finalization run) obtains `now` exactly once
//! and reuses that value, so intra-step comparisons cannot drift.

use chrono::{Local, NaiveDateTime};
use std::sync::Mutex;

/// Local wall-clock time source.
pub trait Clock: Send + Sync {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;
}

/// Production clock reading the system's local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Settable clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Move the clock to a new instant.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn manual_clock_set_and_advance() {
        let t0 = NaiveDate::from_ymd_opt(2025, 6, 6)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let clock = ManualClock::new(t0);
        assert_eq!(clock.now(), t0);

        clock.advance(chrono::Duration::minutes(7));
        assert_eq!(clock.now(), t0 + chrono::Duration::minutes(7));

        let t1 = t0 + chrono::Duration::hours(1);
        clock.set(t1);
        assert_eq!(clock.now(), t1);
    }
}
