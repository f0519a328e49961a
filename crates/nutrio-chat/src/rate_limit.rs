use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};
use nutrio_common::time::millis_between;

use crate::error::ChatError;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_MAX_MESSAGES: usize = 10;

/// Client-side sliding window over successful send timestamps.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    window: Duration,
    max: usize,
    sent: VecDeque<DateTime<Utc>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            window,
            max,
            sent: VecDeque::with_capacity(max),
        }
    }

    /// Fails with the whole seconds until the oldest counted send leaves the
    /// window when the window is full.
    pub fn check(&mut self, now: DateTime<Utc>) -> Result<(), ChatError> {
        self.prune(now);
        if self.sent.len() < self.max {
            return Ok(());
        }

        let window_ms = self.window_millis();
        let elapsed = self
            .sent
            .front()
            .map(|oldest| millis_between(*oldest, now))
            .unwrap_or(window_ms);
        let remaining = window_ms.saturating_sub(elapsed);
        Err(ChatError::RateLimited {
            wait_secs: remaining.div_ceil(1000).max(1),
        })
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.sent.push_back(at);
    }

    /// Drops a previously recorded send, used when delivery fails.
    pub fn forget(&mut self, at: DateTime<Utc>) -> bool {
        match self.sent.iter().rposition(|sent| *sent == at) {
            Some(index) => self.sent.remove(index).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window_ms = self.window_millis();
        while let Some(oldest) = self.sent.front() {
            if millis_between(*oldest, now) >= window_ms {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }

    fn window_millis(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW, RATE_LIMIT_MAX_MESSAGES)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    fn fill(limiter: &mut SlidingWindowLimiter, from: DateTime<Utc>) -> DateTime<Utc> {
        let mut at = from;
        for _ in 0..RATE_LIMIT_MAX_MESSAGES {
            limiter.check(at).unwrap();
            limiter.record(at);
            at += chrono::Duration::seconds(1);
        }
        at
    }

    #[test]
    fn eleventh_send_in_window_is_rejected_with_wait() {
        let mut limiter = SlidingWindowLimiter::default();
        let now = fill(&mut limiter, start());

        assert_eq!(limiter.check(now), Err(ChatError::RateLimited { wait_secs: 50 }));
    }

    #[test]
    fn window_reopens_once_oldest_send_ages_out() {
        let mut limiter = SlidingWindowLimiter::default();
        fill(&mut limiter, start());

        let almost = start() + chrono::Duration::milliseconds(59_500);
        assert_eq!(limiter.check(almost), Err(ChatError::RateLimited { wait_secs: 1 }));

        let reopened = start() + chrono::Duration::seconds(60);
        assert!(limiter.check(reopened).is_ok());
        assert_eq!(limiter.len(), RATE_LIMIT_MAX_MESSAGES - 1);
    }

    #[test]
    fn forgotten_sends_do_not_count() {
        let mut limiter = SlidingWindowLimiter::default();
        let now = fill(&mut limiter, start());

        assert!(limiter.forget(start()));
        assert!(!limiter.forget(start() - chrono::Duration::hours(1)));
        assert!(limiter.check(now).is_ok());
    }
}
