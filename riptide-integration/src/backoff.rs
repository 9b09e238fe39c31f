use rand::Rng;
use std::time::Duration;

/// Bounded exponential backoff with full jitter.
///
/// Each failed attempt doubles the window up to `cap`; the delay actually
/// slept is drawn uniformly from `[0, window]` so concurrent retriers do not
/// synchronise.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Number of consecutive failures recorded since the last [`reset`](Self::reset).
    pub fn consecutive_failures(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return the jittered delay to sleep before the
    /// next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let window = self
            .base
            .checked_mul(2u32.saturating_pow(self.attempt))
            .map(|window| window.min(self.cap))
            .unwrap_or(self.cap);

        self.attempt = self.attempt.saturating_add(1);

        let window_ms = window.as_millis() as u64;
        if window_ms == 0 {
            return Duration::ZERO;
        }

        Duration::from_millis(rand::rng().random_range(0..=window_ms))
    }

    /// Record a success, resetting the failure streak.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_bounded_by_cap() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(30));

        for _ in 0..64 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(30));
        }
        assert_eq!(backoff.consecutive_failures(), 64);
    }

    #[test]
    fn test_reset_clears_failure_streak() {
        let mut backoff = ExponentialBackoff::default();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.consecutive_failures(), 2);

        backoff.reset();
        assert_eq!(backoff.consecutive_failures(), 0);

        // First delay after reset is again within the base window
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_millis(500));
    }
}
