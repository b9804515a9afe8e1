use chrono::{DateTime, Duration, Utc};

/// Source of "now" for staleness checks.
#[cfg_attr(test, mockall::automock)]
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// True once strictly more than `timeout` has passed since `timestamp`.
pub fn is_timeout_expired(timestamp: DateTime<Utc>, timeout: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(timestamp) > timeout
}
