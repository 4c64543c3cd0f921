use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};
use tracing::instrument;

pub type Timestamp = DateTime<Local>;

/// Source of "now" for everything that computes reminder instants.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Local::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<Timestamp>);

impl FixedClock {
    pub fn new(at: Timestamp) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: Timestamp) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A ticker whose first tick happens one `period` from now.
#[instrument]
pub fn timer(period: Duration) -> tokio::time::Interval {
    let start = tokio::time::Instant::now() + period;

    let mut timer = tokio::time::interval_at(start, period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    timer
}

/// compute the time left until `target`.
/// returns `None` when `target` is not strictly after `now`.
pub fn duration_until<Tz: TimeZone>(target: &DateTime<Tz>, now: &DateTime<Tz>) -> Option<Duration> {
    target
        .clone()
        .signed_duration_since(now.clone())
        .to_std()
        .ok()
        .filter(|delay| !delay.is_zero())
}
