//! Pluggable delay between failover attempts.

use std::fmt::Debug;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Computes the pause before the next attempt.
///
/// `attempt` is the number of attempts that have already failed (1-based).
pub trait BackoffStrategy: Send + Sync + Debug {
    fn delay(&self, attempt: u32) -> Duration;
}

/// The same delay before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffStrategy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Exponential backoff with optional random jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Caps exponential growth.
    pub max: Duration,
    /// Multiplier applied on each retry.
    pub multiplier: f64,
    /// Adds up to `jitter_fraction * delay` of random jitter (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl ExponentialBackoff {
    /// Delay without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.initial.as_millis() as f64 * self.multiplier.powi(exp);
        let cap_ms = self.max.as_millis() as f64;
        Duration::from_millis(base_ms.min(cap_ms) as u64)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter_fraction <= 0.0 {
            return base;
        }
        let spread = base.mul_f64(self.jitter_fraction.min(1.0));
        base + tokio_retry::strategy::jitter(spread)
    }
}

/// Serializable backoff choice for configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffKind {
    /// Wait `retry_delay_ms` before every retry.
    #[default]
    Fixed,
    /// Start at `retry_delay_ms` and grow by `multiplier`.
    Exponential {
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(default = "default_max_delay_ms")]
        max_delay_ms: u64,
        #[serde(default)]
        jitter_fraction: f64,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_ignores_attempt() {
        let b = FixedBackoff::new(Duration::from_millis(250));
        assert_eq!(b.delay(1), Duration::from_millis(250));
        assert_eq!(b.delay(7), Duration::from_millis(250));
    }

    #[test]
    fn exponential_doubles() {
        let b = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        };
        assert_eq!(b.delay(1).as_millis(), 100);
        assert_eq!(b.delay(2).as_millis(), 200);
        assert_eq!(b.delay(3).as_millis(), 400);
    }

    #[test]
    fn delay_capped_at_max() {
        let b = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(500),
            multiplier: 10.0,
            jitter_fraction: 0.0,
        };
        assert_eq!(b.delay(5), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let b = ExponentialBackoff {
            initial: Duration::from_millis(1000),
            max: Duration::from_secs(10),
            multiplier: 1.0,
            jitter_fraction: 0.2,
        };
        for _ in 0..50 {
            let d = b.delay(1);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(1200), "{d:?}");
        }
    }

    #[test]
    fn backoff_kind_from_json() {
        let kind: BackoffKind =
            serde_json::from_str(r#"{"type": "exponential", "jitter_fraction": 0.1}"#).unwrap();
        assert_eq!(
            kind,
            BackoffKind::Exponential {
                multiplier: 2.0,
                max_delay_ms: 10_000,
                jitter_fraction: 0.1
            }
        );
    }
}
