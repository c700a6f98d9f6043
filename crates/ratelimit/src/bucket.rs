//! Single token bucket.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

/// Refill rate and capacity of a bucket. Both are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BucketConfig {
    per_minute: u32,
    burst: u32,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidBucketConfig {
    #[error("Rate must be positive, got {0} per minute")]
    Rate(u32),

    #[error("Burst must be at least 1")]
    Burst,
}

impl BucketConfig {
    /// Builds a config refilling `per_minute` tokens every minute.
    pub fn per_minute(per_minute: u32, burst: u32) -> Result<Self, InvalidBucketConfig> {
        if per_minute == 0 {
            return Err(InvalidBucketConfig::Rate(per_minute));
        }
        if burst == 0 {
            return Err(InvalidBucketConfig::Burst);
        }
        Ok(Self::known(per_minute, burst))
    }

    pub(crate) const fn known(per_minute: u32, burst: u32) -> Self {
        Self { per_minute, burst }
    }

    /// Tokens added per minute.
    pub fn rate_per_minute(&self) -> u32 {
        self.per_minute
    }

    /// Maximum tokens held, and so the largest admissible burst.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    pub fn rate_per_sec(&self) -> f64 {
        f64::from(self.per_minute) / 60.0
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed. `remaining` whole tokens are left.
    Allowed { remaining: u32 },
    /// The request is refused until at least one token has refilled.
    Denied { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Whole seconds to advertise in a `Retry-After` header, never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Denied { retry_after } => {
                let secs = retry_after.as_secs_f64().ceil() as u64;
                Some(secs.max(1))
            }
        }
    }
}

/// Continuously refilling bucket.
///
/// Starts full. Tokens never exceed `burst` and never go negative.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    config: BucketConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: f64::from(config.burst),
            last_refill: now,
        }
    }

    /// Refills for the time elapsed since the last call, then tries to
    /// take one token.
    ///
    /// A `now` earlier than the last refill adds nothing.
    pub fn try_acquire(&mut self, now: Instant) -> Decision {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Allowed {
                remaining: self.tokens.floor() as u32,
            }
        } else {
            let missing = 1.0 - self.tokens;
            Decision::Denied {
                retry_after: Duration::from_secs_f64(
                    missing * 60.0 / f64::from(self.config.per_minute),
                ),
            }
        }
    }

    /// Instant of the last refill, used for idle eviction.
    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let burst = f64::from(self.config.burst);
        let refilled = elapsed * f64::from(self.config.per_minute) / 60.0;
        self.tokens = (self.tokens + refilled).min(burst);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn per_minute(rate: u32, burst: u32) -> BucketConfig {
        BucketConfig::per_minute(rate, burst).unwrap()
    }

    #[test]
    fn admits_the_burst_then_denies() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(per_minute(30, 5), start);

        for expected in (0..5).rev() {
            assert_eq!(
                bucket.try_acquire(start),
                Decision::Allowed {
                    remaining: expected
                }
            );
        }
        let denied = bucket.try_acquire(start);
        assert_eq!(
            denied,
            Decision::Denied {
                retry_after: Duration::from_secs(2)
            }
        );
        assert_eq!(denied.retry_after_secs(), Some(2));
    }

    #[test]
    fn refills_with_elapsed_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(per_minute(60, 1), start);

        assert!(bucket.try_acquire(start).is_allowed());
        assert!(!bucket.try_acquire(start + Duration::from_millis(500)).is_allowed());
        assert!(bucket.try_acquire(start + Duration::from_secs(1)).is_allowed());
    }

    #[test]
    fn never_exceeds_burst() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(per_minute(300, 3), start);

        let later = start + Duration::from_secs(3600);
        assert_eq!(bucket.try_acquire(later), Decision::Allowed { remaining: 2 });
        assert!(bucket.tokens() <= 3.0);
    }

    #[test]
    fn clock_going_backwards_adds_nothing() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut bucket = TokenBucket::new(per_minute(60, 1), start);

        assert!(bucket.try_acquire(start).is_allowed());
        assert!(
            !bucket
                .try_acquire(start - Duration::from_secs(5))
                .is_allowed()
        );
        assert_eq!(bucket.last_refill(), start);
    }

    #[test]
    fn denial_advertises_at_least_one_second() {
        let decision = Decision::Denied {
            retry_after: Duration::from_millis(10),
        };
        assert_eq!(decision.retry_after_secs(), Some(1));
        assert_eq!(Decision::Allowed { remaining: 0 }.retry_after_secs(), None);
    }

    #[test]
    fn rejects_degenerate_configs() {
        assert_eq!(
            BucketConfig::per_minute(0, 5),
            Err(InvalidBucketConfig::Rate(0))
        );
        assert_eq!(
            BucketConfig::per_minute(10, 0),
            Err(InvalidBucketConfig::Burst)
        );
        assert_eq!(per_minute(120, 1).rate_per_sec(), 2.0);
    }
}
