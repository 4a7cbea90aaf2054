//! The `Provider` trait — the contract every backend adapter implements.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::RelayError;
use crate::request::RpcRequest;

/// Closed set of backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Alchemy,
    Infura,
    #[serde(rename = "quicknode")]
    QuickNode,
    Etherscan,
    Custom,
    Public,
    BrowserExtension,
    #[serde(rename = "websocket")]
    WebSocket,
    Ipc,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 9] = [
        Self::Alchemy,
        Self::Infura,
        Self::QuickNode,
        Self::Etherscan,
        Self::Custom,
        Self::Public,
        Self::BrowserExtension,
        Self::WebSocket,
        Self::Ipc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alchemy => "alchemy",
            Self::Infura => "infura",
            Self::QuickNode => "quicknode",
            Self::Etherscan => "etherscan",
            Self::Custom => "custom",
            Self::Public => "public",
            Self::BrowserExtension => "browser_extension",
            Self::WebSocket => "websocket",
            Self::Ipc => "ipc",
        }
    }

    /// Estimated USD cost per request, from published per-1000 pricing.
    pub fn estimated_cost_per_request(self) -> Option<f64> {
        let per_thousand = match self {
            Self::Alchemy => 0.12,
            Self::Infura => 0.10,
            Self::QuickNode => 0.15,
            Self::Etherscan | Self::Public => 0.0,
            Self::Custom => 0.05,
            Self::BrowserExtension | Self::WebSocket | Self::Ipc => return None,
        };
        Some(per_thousand / 1000.0)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider identity, `"{kind}_{name}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(kind: ProviderKind, name: &str) -> Self {
        Self(format!("{kind}_{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub requests: u32,
    pub window_ms: u64,
}

impl RateLimit {
    pub fn per_second(requests: u32) -> Self {
        Self {
            requests,
            window_ms: 1000,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Per-provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Upper bound for a single attempt against this provider.
    pub timeout_ms: u64,
    /// How many times the manager may retry this same provider within one
    /// request before skipping it. The provider itself never retries.
    pub retries: u32,
    /// Lower is preferred.
    pub priority: u32,
    /// Relative share for weighted round robin.
    pub weight: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    /// Overrides the kind's estimated cost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_per_request: Option<f64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            network: None,
            chain_id: None,
            timeout_ms: 30_000,
            retries: 3,
            priority: 100,
            weight: 1,
            rate_limit: None,
            cost_per_request: None,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.timeout_ms == 0 {
            return Err(RelayError::Config("timeout_ms must be greater than 0".into()));
        }
        if let Some(limit) = self.rate_limit {
            if limit.requests == 0 || limit.window_ms == 0 {
                return Err(RelayError::Config(
                    "rate_limit requires requests > 0 and window_ms > 0".into(),
                ));
            }
        }
        if let Some(cost) = self.cost_per_request {
            if !cost.is_finite() || cost < 0.0 {
                return Err(RelayError::Config(format!("invalid cost_per_request {cost}")));
            }
        }
        Ok(())
    }
}

/// Externally visible per-provider statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub request_count: u64,
    pub error_count: u64,
    pub average_response_time_ms: f64,
    pub last_error: Option<String>,
    pub last_request_time: Option<DateTime<Utc>>,
    pub is_healthy: bool,
}

impl Default for ProviderStats {
    fn default() -> Self {
        Self {
            request_count: 0,
            error_count: 0,
            average_response_time_ms: 0.0,
            last_error: None,
            last_request_time: None,
            is_healthy: true,
        }
    }
}

/// Features a provider declares once at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCapabilities {
    pub batch: bool,
    pub subscription: bool,
    pub websocket: bool,
    /// Historical state.
    pub archive: bool,
    /// Debug/trace namespace.
    pub trace: bool,
    pub logs: bool,
    /// Pending transaction pool.
    pub pending: bool,
}

#[derive(Default)]
struct TrackerState {
    stats: ProviderStats,
    samples: u64,
}

/// Rolling stats bookkeeping shared by provider implementations.
///
/// The average response time is a lifetime mean over every completed call,
/// successful or not.
#[derive(Default)]
pub struct StatsTracker {
    state: Mutex<TrackerState>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one call, recording count, latency and outcome.
    ///
    /// A call dropped before it completes (for example by an outer timeout)
    /// still counts as a failure.
    pub async fn track<T, F>(&self, call: F) -> Result<T, RelayError>
    where
        F: Future<Output = Result<T, RelayError>>,
    {
        {
            let mut state = self.state.lock();
            state.stats.request_count += 1;
            state.stats.last_request_time = Some(Utc::now());
        }

        let mut pending = PendingCall {
            tracker: self,
            started: Instant::now(),
            done: false,
        };
        let result = call.await;
        pending.finish(result.as_ref().err().map(ToString::to_string));
        result
    }

    fn record_outcome(&self, elapsed: Duration, error: Option<String>) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let mut state = self.state.lock();
        state.samples += 1;
        let n = state.samples as f64;
        state.stats.average_response_time_ms += (elapsed_ms - state.stats.average_response_time_ms) / n;
        if let Some(error) = error {
            state.stats.error_count += 1;
            state.stats.last_error = Some(error);
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().stats.is_healthy = healthy;
    }

    pub fn snapshot(&self) -> ProviderStats {
        self.state.lock().stats.clone()
    }
}

/// Settles one tracked call exactly once, on completion or on drop.
struct PendingCall<'a> {
    tracker: &'a StatsTracker,
    started: Instant,
    done: bool,
}

impl PendingCall<'_> {
    fn finish(&mut self, error: Option<String>) {
        self.done = true;
        self.tracker.record_outcome(self.started.elapsed(), error);
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.done {
            let elapsed = self.started.elapsed();
            self.finish(Some(format!(
                "call abandoned after {}ms",
                elapsed.as_millis()
            )));
        }
    }
}

/// The central async trait every provider backend must implement.
///
/// Implementations must be `Send + Sync` and are stored as
/// `Arc<dyn Provider>`. `call` is the single primitive; everything else has a
/// default built on it. A provider must never retry internally: failover is
/// the manager's job.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &str;

    fn id(&self) -> ProviderId {
        ProviderId::new(self.kind(), self.name())
    }

    fn config(&self) -> &ProviderConfig;

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    /// Stats bookkeeping for this provider.
    fn tracker(&self) -> &StatsTracker;

    async fn connect(&self) -> Result<(), RelayError>;

    async fn disconnect(&self) -> Result<(), RelayError>;

    fn is_connected(&self) -> bool;

    /// Issue one call and return the raw result value, propagating the
    /// backend's error verbatim.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RelayError>;

    async fn request(&self, req: RpcRequest) -> Result<Value, RelayError> {
        self.call(&req.method, req.params).await
    }

    /// Execute several requests, one result per request in input order.
    ///
    /// Default implementation calls them sequentially; batch-capable
    /// backends override this with a single grouped call.
    async fn batch(
        &self,
        reqs: &[RpcRequest],
    ) -> Result<Vec<Result<Value, RelayError>>, RelayError> {
        let mut results = Vec::with_capacity(reqs.len());
        for req in reqs {
            results.push(self.call(&req.method, req.params.clone()).await);
        }
        Ok(results)
    }

    fn stats(&self) -> ProviderStats {
        self.tracker().snapshot()
    }

    async fn health_check(&self) -> bool {
        let healthy = self.call("eth_blockNumber", Vec::new()).await.is_ok();
        self.tracker().set_healthy(healthy);
        healthy
    }
}
