//! Sharded registry of per-client buckets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::bucket::{Decision, TokenBucket};
use crate::policy::{PolicyClass, RateLimitPolicy};

type BucketKey = (PolicyClass, String);

/// Owns every bucket of the process.
///
/// Buckets are created on first use and live in a [`DashMap`], so admission
/// for different clients contends only on a shard lock. Cloning shares the
/// buckets.
#[derive(Debug, Clone)]
pub struct RateLimiterRegistry {
    policy: Arc<RateLimitPolicy>,
    buckets: Arc<DashMap<BucketKey, TokenBucket>>,
}

impl RateLimiterRegistry {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            buckets: Arc::new(DashMap::new()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Admits or denies one request from `client` under `class`.
    pub fn admit(&self, class: PolicyClass, client: &str) -> Decision {
        self.admit_at(class, client, Instant::now())
    }

    /// [`admit`](Self::admit) against an explicit clock reading.
    pub fn admit_at(&self, class: PolicyClass, client: &str, now: Instant) -> Decision {
        let config = self.policy.config(class);
        let decision = self
            .buckets
            .entry((class, client.to_string()))
            .or_insert_with(|| TokenBucket::new(config, now))
            .try_acquire(now);

        if let Decision::Denied { retry_after } = decision {
            metrics::counter!("ratelimit_rejections_total", "class" => class.as_str())
                .increment(1);
            tracing::debug!(%class, client, ?retry_after, "request rate limited");
        }
        decision
    }

    /// Drops buckets untouched for longer than `max_idle`. Returns how many
    /// were removed.
    pub fn purge_idle(&self, max_idle: Duration) -> usize {
        self.purge_idle_at(max_idle, Instant::now())
    }

    pub fn purge_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill()) <= max_idle);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, "evicted idle rate-limit buckets");
        }
        removed
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}
