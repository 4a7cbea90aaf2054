//! chainrelay-core — provider orchestration for ChainRelay.
//!
//! # Overview
//!
//! ChainRelay spreads blockchain RPC traffic over several interchangeable
//! backends. The core crate defines:
//!
//! - [`Provider`] — the async trait every backend implements
//! - [`EthApi`] — typed `eth_*` wrappers over any provider or the manager
//! - [`RateLimiter`] — per-provider token bucket with a FIFO wait queue
//! - [`ResponseCache`] — TTL + LRU cache with per-method TTL tiers
//! - [`LoadBalancer`] — six selection strategies over healthy providers
//! - [`ProviderManager`] — cache, selection, rate limiting, failover, health
//!   monitoring and batching in one place
//! - [`RelayError`] — structured error type
//!
//! The crate carries no wire format; see `chainrelay-http` for a JSON-RPC
//! over HTTP provider.

pub mod balancer;
pub mod cache;
pub mod config;
pub mod error;
pub mod eth;
pub mod manager;
pub mod policy;
pub mod provider;
pub mod request;

pub use balancer::{HealthPolicy, LoadBalancer, ProviderMetrics, Reservation, SelectionFilter, Strategy};
pub use cache::{CacheStats, CacheTier, ResponseCache};
pub use config::{CacheConfig, FallbackConfig, MonitoringConfig, ProviderManagerConfig};
pub use error::{RelayError, RpcFault};
pub use eth::EthApi;
pub use manager::ProviderManager;
pub use policy::{BackoffKind, BackoffStrategy, ExponentialBackoff, FixedBackoff, RateLimiter, RateLimiterConfig};
pub use provider::{
    Provider, ProviderCapabilities, ProviderConfig, ProviderId, ProviderKind, ProviderStats, RateLimit,
    StatsTracker,
};
pub use request::{BlockId, BlockTag, RpcRequest};
