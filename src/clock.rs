//! Wall-clock source used by the scheduler and the analytics jobs.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date after shifting UTC by `offset_hours`.
    fn today(&self, offset_hours: i32) -> NaiveDate {
        local_date(self.now(), offset_hours)
    }
}

/// Calendar date of `instant` in a fixed-offset timezone.
pub fn local_date(instant: DateTime<Utc>, offset_hours: i32) -> NaiveDate {
    (instant + ChronoDuration::hours(offset_hours as i64)).date_naive()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
