//! Token bucket rate limiting.
//!
//! Requests are admitted per `(PolicyClass, client)` pair. Each pair owns a
//! lazily created [`TokenBucket`] held in a sharded [`RateLimiterRegistry`];
//! the bucket refills continuously and a request costs one token.

pub mod bucket;
pub mod policy;
pub mod registry;

pub use bucket::{BucketConfig, Decision, InvalidBucketConfig, TokenBucket};
pub use policy::{PolicyClass, RateLimitPolicy};
pub use registry::RateLimiterRegistry;
