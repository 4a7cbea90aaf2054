//! Manager configuration.
//!
//! Every struct deserializes from partial JSON; missing fields take the
//! defaults below.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::balancer::Strategy;
use crate::error::RelayError;
use crate::policy::{BackoffKind, BackoffStrategy, ExponentialBackoff, FixedBackoff};

/// Top-level configuration for a [`ProviderManager`](crate::manager::ProviderManager).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderManagerConfig {
    pub strategy: Strategy,
    pub cache: CacheConfig,
    pub fallback: FallbackConfig,
    pub monitoring: MonitoringConfig,
}

impl ProviderManagerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, RelayError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        self.cache.validate()?;
        self.fallback.validate()?;
        self.monitoring.validate()
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL for methods outside every tier list.
    pub ttl_ms: u64,
    /// TTL for fast-moving values (block number, gas price).
    pub short_ttl_ms: u64,
    /// TTL for immutable values (chain id, code, mined transactions).
    pub long_ttl_ms: u64,
    /// Maximum number of entries.
    pub max_size: usize,
    /// Maximum estimated memory footprint.
    pub max_memory_bytes: usize,
    /// How often expired entries are swept. `0` disables the sweep task.
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 60_000,
            short_ttl_ms: 3_000,
            long_ttl_ms: 3_600_000,
            max_size: 1000,
            max_memory_bytes: 50 * 1024 * 1024,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn short_ttl(&self) -> Duration {
        Duration::from_millis(self.short_ttl_ms)
    }

    pub fn long_ttl(&self) -> Duration {
        Duration::from_millis(self.long_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_ms > 0).then(|| Duration::from_millis(self.cleanup_interval_ms))
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.enabled && (self.max_size == 0 || self.max_memory_bytes == 0) {
            return Err(RelayError::Config(
                "cache.max_size and cache.max_memory_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Retry/failover settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Retries after the first attempt; total attempts are `1 + max_retries`.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_delay_ms: u64,
    pub backoff: BackoffKind,
    /// Longest wait for a rate-limiter token before trying another provider.
    pub rate_limit_wait_ms: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            retry_delay_ms: 1000,
            backoff: BackoffKind::Fixed,
            rate_limit_wait_ms: 5000,
        }
    }
}

impl FallbackConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    /// Attempts allowed per request.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Build the configured backoff strategy.
    pub fn backoff_strategy(&self) -> Arc<dyn BackoffStrategy> {
        match &self.backoff {
            BackoffKind::Fixed => Arc::new(FixedBackoff::new(self.retry_delay())),
            BackoffKind::Exponential {
                multiplier,
                max_delay_ms,
                jitter_fraction,
            } => Arc::new(ExponentialBackoff {
                initial: self.retry_delay(),
                max: Duration::from_millis(*max_delay_ms),
                multiplier: *multiplier,
                jitter_fraction: *jitter_fraction,
            }),
        }
    }

    fn validate(&self) -> Result<(), RelayError> {
        if let BackoffKind::Exponential {
            multiplier,
            jitter_fraction,
            ..
        } = &self.backoff
        {
            if !(*multiplier >= 1.0) {
                return Err(RelayError::Config("backoff multiplier must be >= 1".into()));
            }
            if !(0.0..=1.0).contains(jitter_fraction) {
                return Err(RelayError::Config("jitter_fraction must be within 0..=1".into()));
            }
        }
        Ok(())
    }
}

/// Health monitoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub health_check_interval_ms: u64,
    /// Consecutive failed probes before a provider is marked unhealthy.
    pub unhealthy_threshold: u32,
    /// Lifetime failure rate above which live traffic ejects a provider.
    /// `None` disables ejection.
    pub failure_rate_threshold: Option<f64>,
    /// Requests a provider must have served before ejection applies.
    pub min_requests: u64,
    /// Consecutive successes that restore an ejected provider.
    pub recovery_successes: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            health_check_interval_ms: 30_000,
            unhealthy_threshold: 3,
            failure_rate_threshold: Some(0.5),
            min_requests: 10,
            recovery_successes: 1,
        }
    }
}

impl MonitoringConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.enabled && self.health_check_interval_ms == 0 {
            return Err(RelayError::Config(
                "monitoring.health_check_interval_ms must be greater than 0".into(),
            ));
        }
        if self.unhealthy_threshold == 0 {
            return Err(RelayError::Config(
                "monitoring.unhealthy_threshold must be greater than 0".into(),
            ));
        }
        if let Some(rate) = self.failure_rate_threshold {
            if !(0.0..=1.0).contains(&rate) {
                return Err(RelayError::Config(
                    "monitoring.failure_rate_threshold must be within 0..=1".into(),
                ));
            }
        }
        Ok(())
    }
}
