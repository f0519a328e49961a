use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Source of wall-clock time for rate limiting, debouncing and timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        if let Ok(mut current) = self.current.lock() {
            *current = current.checked_add_signed(delta).unwrap_or(*current);
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Milliseconds elapsed from `earlier` to `later`, clamped at zero.
pub fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    u64::try_from((later - earlier).num_milliseconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn manual_clock_advances_shared_instant() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let other = clock.clone();

        other.advance(Duration::from_millis(1500));

        assert_eq!(millis_between(start, clock.now()), 1500);
    }

    #[test]
    fn millis_between_clamps_negative_spans() {
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 1).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(millis_between(later, earlier), 0);
    }
}
