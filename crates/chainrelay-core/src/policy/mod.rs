//! Reliability policies applied by the manager around each provider call.
//!
//! ```text
//! Request → [LoadBalancer] → [RateLimiter] → Provider::call → [Backoff] → retry
//!                 ↑
//!          [ProbeTracker] (health-check loop)
//! ```

pub mod backoff;
pub mod health;
pub mod rate_limiter;

pub use backoff::{BackoffKind, BackoffStrategy, ExponentialBackoff, FixedBackoff};
pub use health::{HealthState, ProbeTracker};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, TokenBucket};
