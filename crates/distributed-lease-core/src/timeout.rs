//! Timeout and retry backoff helpers.

use std::time::{Duration, Instant};

use rand::Rng;

/// Internal helper for timeout calculations.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutValue {
    millis: i64, // -1 for infinite
}

impl TimeoutValue {
    pub const INFINITE: Self = Self { millis: -1 };
    pub const ZERO: Self = Self { millis: 0 };

    pub fn is_infinite(&self) -> bool {
        self.millis < 0
    }

    pub fn is_zero(&self) -> bool {
        self.millis == 0
    }

    pub fn as_duration(&self) -> Option<Duration> {
        if self.is_infinite() {
            None
        } else {
            Some(Duration::from_millis(self.millis as u64))
        }
    }

    /// Time left before the timeout expires, measured from `start`.
    ///
    /// `None` for infinite timeouts.
    pub fn remaining(&self, start: Instant) -> Option<Duration> {
        self.as_duration()
            .map(|total| total.saturating_sub(start.elapsed()))
    }
}

impl From<Option<Duration>> for TimeoutValue {
    fn from(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Self::INFINITE,
            Some(d) => Self {
                millis: d.as_millis().min(i64::MAX as u128) as i64,
            },
        }
    }
}

/// Exponential backoff with jitter between acquisition attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_millis(10);
    const MIN_SLEEP: Duration = Duration::from_millis(5);
    const MAX_SLEEP: Duration = Duration::from_secs(1);
    const MULTIPLIER: u32 = 2;

    pub fn new() -> Self {
        Self {
            current: Self::INITIAL,
        }
    }

    /// Returns the next sleep, capped at `limit`, and advances the backoff.
    pub fn next_delay(&mut self, limit: Option<Duration>) -> Duration {
        let mut sleep = self.current;
        if let Some(limit) = limit {
            sleep = sleep.min(limit);
        }

        // Jitter (+/-25%) so that waiters on the same lock spread out.
        let jitter_range = sleep.as_millis() as i64 / 4;
        let with_jitter = if jitter_range > 0 {
            let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            if offset >= 0 {
                sleep + Duration::from_millis(offset as u64)
            } else {
                sleep.saturating_sub(Duration::from_millis(offset.unsigned_abs()))
            }
        } else {
            sleep
        };

        self.current = (self.current * Self::MULTIPLIER)
            .min(Self::MAX_SLEEP)
            .max(Self::MIN_SLEEP);

        match limit {
            Some(limit) => with_jitter.min(limit),
            None => with_jitter,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_value() {
        assert!(TimeoutValue::from(None).is_infinite());
        assert!(TimeoutValue::from(Some(Duration::ZERO)).is_zero());
        assert_eq!(
            TimeoutValue::from(Some(Duration::from_millis(250))).as_duration(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new();
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            last = backoff.next_delay(None);
        }
        assert!(last <= Backoff::MAX_SLEEP + Backoff::MAX_SLEEP / 4);
        assert!(last >= Backoff::MAX_SLEEP - Backoff::MAX_SLEEP / 4);
    }

    #[test]
    fn test_backoff_jitter_stays_within_a_quarter() {
        for _ in 0..50 {
            let mut backoff = Backoff::new();
            backoff.next_delay(None);
            backoff.next_delay(None);
            // Third step is 40ms before jitter.
            let delay = backoff.next_delay(None);
            assert!(delay >= Duration::from_millis(30), "{delay:?}");
            assert!(delay <= Duration::from_millis(50), "{delay:?}");
        }
    }

    #[test]
    fn test_backoff_jitter_spreads_simultaneous_waiters() {
        let delays: std::collections::HashSet<Duration> = (0..32)
            .map(|_| {
                let mut backoff = Backoff::new();
                for _ in 0..6 {
                    backoff.next_delay(None);
                }
                backoff.next_delay(None)
            })
            .collect();
        assert!(delays.len() > 1);
    }

    #[test]
    fn test_backoff_respects_limit() {
        let mut backoff = Backoff::new();
        for _ in 0..10 {
            assert!(backoff.next_delay(Some(Duration::from_millis(3))) <= Duration::from_millis(3));
        }
    }
}
