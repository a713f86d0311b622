//! Error budget and retry spacing for history polling.
//!
//! A prompt that is still queued or running is polled at the base
//! interval. Transport errors stretch the gap between polls and are
//! counted; any successful response puts both back to where they started.

use std::time::Duration;

/// Tracks consecutive poll failures for one prompt.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    max_delay: Duration,
    max_errors: u32,
    delay: Duration,
    consecutive_errors: u32,
}

impl PollBackoff {
    /// `max_errors` is the number of consecutive failures that ends the
    /// poll. A budget of zero is treated as one.
    pub fn new(poll_interval: Duration, max_delay: Duration, max_errors: u32) -> Self {
        let base = poll_interval.min(max_delay);
        Self {
            base,
            max_delay,
            max_errors: max_errors.max(1),
            delay: base,
            consecutive_errors: 0,
        }
    }

    /// Time to wait before the next poll.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// A history response arrived, whatever it said.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.delay = self.base;
    }

    /// A poll failed. Returns the wait before retrying, or `None` once the
    /// budget is spent.
    ///
    /// The first failure in a run retries at the base interval; each one
    /// after that doubles the gap up to `max_delay`.
    pub fn record_error(&mut self) -> Option<Duration> {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.max_errors {
            return None;
        }
        if self.consecutive_errors > 1 {
            self.delay = self.delay.saturating_mul(2).min(self.max_delay);
        }
        Some(self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_error_retries_at_poll_interval() {
        let mut backoff = PollBackoff::new(ms(500), Duration::from_secs(30), 10);
        assert_eq!(backoff.record_error(), Some(ms(500)));
        assert_eq!(backoff.consecutive_errors(), 1);
    }

    #[test]
    fn later_errors_double_up_to_the_cap() {
        let mut backoff = PollBackoff::new(Duration::from_secs(1), Duration::from_secs(10), 100);
        let delays: Vec<u64> = (0..7)
            .map(|_| backoff.record_error().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10, 10]);
    }

    #[test]
    fn success_resets_delay_and_count() {
        let mut backoff = PollBackoff::new(ms(250), Duration::from_secs(30), 3);
        backoff.record_error();
        backoff.record_error();
        assert_eq!(backoff.delay(), ms(500));

        backoff.record_success();
        assert_eq!(backoff.delay(), ms(250));
        assert_eq!(backoff.consecutive_errors(), 0);

        // A fresh run gets the whole budget again.
        assert_eq!(backoff.record_error(), Some(ms(250)));
        assert_eq!(backoff.record_error(), Some(ms(500)));
        assert_eq!(backoff.record_error(), None);
    }

    #[test]
    fn budget_is_spent_on_the_last_allowed_error() {
        let mut backoff = PollBackoff::new(ms(10), Duration::from_secs(30), 3);
        assert!(backoff.record_error().is_some());
        assert!(backoff.record_error().is_some());
        assert_eq!(backoff.record_error(), None);
        assert_eq!(backoff.consecutive_errors(), 3);
    }

    #[test]
    fn zero_budget_fails_on_first_error() {
        let mut backoff = PollBackoff::new(ms(10), Duration::from_secs(30), 0);
        assert_eq!(backoff.record_error(), None);
    }

    #[test]
    fn interval_above_cap_is_clamped() {
        let backoff = PollBackoff::new(Duration::from_secs(60), Duration::from_secs(30), 5);
        assert_eq!(backoff.delay(), Duration::from_secs(30));
    }
}
