//! Poll interval computation.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::HostError;

/// Bounds for the listener's poll interval.
pub struct QueuePollingIntervals;

impl QueuePollingIntervals {
    /// Shortest wait between two polls.
    pub const MINIMUM: Duration = Duration::from_millis(100);

    /// Cap used when the configuration does not set one.
    pub const DEFAULT_MAXIMUM: Duration = Duration::from_secs(60);
}

/// Computes how long to wait before the next poll.
pub trait DelayStrategy: Send + Sync {
    /// `found_message` is whether the poll that just finished produced work.
    fn next_delay(&mut self, found_message: bool) -> Duration;
}

/// Randomized exponential backoff.
///
/// - A poll that found work resets the interval to `minimum`.
/// - Each consecutive empty poll waits `minimum + j * 2^(n-1) * delta`,
///   `j` drawn from `[0.8, 1.2)`, capped at `maximum`.
///
/// With a ±20% spread the sequence is strictly increasing until the cap for
/// every draw (`0.8 * 2^n > 1.2 * 2^(n-1)`), while still desynchronizing
/// listeners that poll the same queue.
#[derive(Debug)]
pub struct RandomizedExponentialBackoff {
    minimum: Duration,
    maximum: Duration,
    delta: Duration,
    backoff_exponent: u32,
    current: Duration,
    rng: StdRng,
}

const JITTER_LOW: f64 = 0.8;
const JITTER_HIGH: f64 = 1.2;

impl RandomizedExponentialBackoff {
    pub fn new(minimum: Duration, maximum: Duration) -> Result<Self, HostError> {
        Self::with_rng(minimum, maximum, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests and reproducible runs.
    pub fn with_seed(minimum: Duration, maximum: Duration, seed: u64) -> Result<Self, HostError> {
        Self::with_rng(minimum, maximum, StdRng::seed_from_u64(seed))
    }

    /// Like `new`, but raises `maximum` to `minimum` instead of failing.
    /// `minimum` of zero is raised to [`QueuePollingIntervals::MINIMUM`].
    pub fn clamped(minimum: Duration, maximum: Duration) -> Self {
        let minimum = if minimum.is_zero() {
            QueuePollingIntervals::MINIMUM
        } else {
            minimum
        };
        Self::from_parts(minimum, maximum.max(minimum), StdRng::from_entropy())
    }

    fn with_rng(minimum: Duration, maximum: Duration, rng: StdRng) -> Result<Self, HostError> {
        if minimum.is_zero() {
            return Err(HostError::InvalidConfig(
                "minimum polling interval must be positive".to_string(),
            ));
        }
        if maximum < minimum {
            return Err(HostError::InvalidConfig(format!(
                "maximum polling interval {maximum:?} is below the minimum {minimum:?}"
            )));
        }
        Ok(Self::from_parts(minimum, maximum, rng))
    }

    fn from_parts(minimum: Duration, maximum: Duration, rng: StdRng) -> Self {
        Self {
            minimum,
            maximum,
            delta: minimum,
            backoff_exponent: 1,
            current: minimum,
            rng,
        }
    }

    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    pub fn maximum(&self) -> Duration {
        self.maximum
    }
}

impl DelayStrategy for RandomizedExponentialBackoff {
    fn next_delay(&mut self, found_message: bool) -> Duration {
        if found_message {
            self.current = self.minimum;
            self.backoff_exponent = 1;
            return self.current;
        }

        if self.current == self.maximum {
            return self.current;
        }

        let jitter: f64 = self.rng.gen_range(JITTER_LOW..JITTER_HIGH);
        let factor = 2f64.powi(self.backoff_exponent.saturating_sub(1).min(40) as i32);
        let candidate = Duration::try_from_secs_f64(self.delta.as_secs_f64() * jitter * factor)
            .ok()
            .and_then(|increment| self.minimum.checked_add(increment))
            .unwrap_or(self.maximum);

        if candidate < self.maximum {
            self.current = candidate;
            self.backoff_exponent += 1;
        } else {
            self.current = self.maximum;
        }
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MIN: Duration = QueuePollingIntervals::MINIMUM;

    fn backoff(max: Duration, seed: u64) -> RandomizedExponentialBackoff {
        RandomizedExponentialBackoff::with_seed(MIN, max, seed).unwrap()
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(42)]
    #[case(u64::MAX)]
    fn empty_polls_never_shorten_the_wait(#[case] seed: u64) {
        let max = Duration::from_secs(60);
        let mut strategy = backoff(max, seed);

        let mut previous = Duration::ZERO;
        for _ in 0..64 {
            let next = strategy.next_delay(false);
            assert!(next >= previous, "{next:?} < {previous:?}");
            assert!(next <= max);
            assert!(next > MIN);
            previous = next;
        }
        assert_eq!(previous, max);
    }

    #[test]
    fn found_message_resets_to_minimum() {
        let mut strategy = backoff(Duration::from_secs(60), 7);
        for _ in 0..10 {
            strategy.next_delay(false);
        }

        assert_eq!(strategy.next_delay(true), MIN);

        let after_reset = strategy.next_delay(false);
        assert!(after_reset >= MIN + MIN.mul_f64(JITTER_LOW));
        assert!(after_reset < MIN + MIN.mul_f64(JITTER_HIGH));
    }

    #[test]
    fn first_empty_poll_is_jittered_around_minimum_plus_delta() {
        let mut strategy = backoff(Duration::from_secs(60), 3);
        let first = strategy.next_delay(false);
        assert!(first >= Duration::from_millis(180));
        assert!(first < Duration::from_millis(220));
    }

    #[test]
    fn maximum_equal_to_minimum_is_constant() {
        let mut strategy = backoff(MIN, 0);
        assert_eq!(strategy.next_delay(false), MIN);
        assert_eq!(strategy.next_delay(false), MIN);
        assert_eq!(strategy.next_delay(true), MIN);
    }

    #[test]
    fn rejects_maximum_below_minimum() {
        let err = RandomizedExponentialBackoff::new(MIN, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, HostError::InvalidConfig(_)));
    }

    #[test]
    fn clamped_raises_maximum_to_minimum() {
        let strategy = RandomizedExponentialBackoff::clamped(MIN, Duration::from_millis(10));
        assert_eq!(strategy.minimum(), MIN);
        assert_eq!(strategy.maximum(), MIN);
    }

    #[test]
    fn rejects_zero_minimum() {
        let err = RandomizedExponentialBackoff::new(Duration::ZERO, MIN).unwrap_err();
        assert!(matches!(err, HostError::InvalidConfig(_)));
    }
}
