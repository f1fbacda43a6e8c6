//! # Backoff policy for retrying failed starts.
//!
//! [`BackoffPolicy`] controls how retry delays grow after repeated spawn
//! failures. It is parameterized by:
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The default schedule is 500ms → 1s → 2s → 4s (capped). A crashing
//! program with the default three start retries accumulates ~1.5s of
//! delay before going FATAL.

use std::time::Duration;

/// Retry backoff policy with capped multiplicative growth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// Returns the default schedule:
    /// - `first = 500ms`
    /// - `factor = 2.0`
    /// - `max = 4s`
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(4),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Computes the next delay from the previous one.
    ///
    /// - If `prev` is `None`, returns `first` clamped to `max`.
    /// - Otherwise multiplies the previous delay by [`BackoffPolicy::factor`]
    ///   and caps the result at [`BackoffPolicy::max`].
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        let unclamped = match prev {
            None => self.first,
            Some(d) => {
                let grown = d.as_secs_f64() * self.factor;
                if !grown.is_finite() {
                    self.max
                } else {
                    d.mul_f64(self.factor)
                }
            }
        };
        unclamped.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        let d1 = policy.next(None);
        let d2 = policy.next(Some(d1));
        let d3 = policy.next(Some(d2));
        let d4 = policy.next(Some(d3));
        let d5 = policy.next(Some(d4));
        assert_eq!(d1, Duration::from_millis(500));
        assert_eq!(d2, Duration::from_secs(1));
        assert_eq!(d3, Duration::from_secs(2));
        assert_eq!(d4, Duration::from_secs(4));
        assert_eq!(d5, Duration::from_secs(4));
    }

    #[test]
    fn first_delay_is_clamped_to_max() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(3),
            factor: 2.0,
        };
        assert_eq!(policy.next(None), Duration::from_secs(3));
    }

    #[test]
    fn constant_factor_keeps_delay_flat() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(200),
            max: Duration::from_secs(30),
            factor: 1.0,
        };
        let d1 = policy.next(None);
        let d2 = policy.next(Some(d1));
        assert_eq!(d1, d2);
    }
}
