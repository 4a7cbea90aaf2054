//! Scriptable in-memory provider shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use chainrelay_core::{
    Provider, ProviderCapabilities, ProviderConfig, ProviderId, ProviderKind, ProviderManagerConfig,
    RelayError, RpcFault, RpcRequest, StatsTracker,
};

/// Method that always answers with an RPC error.
pub const REVERT_METHOD: &str = "eth_call";
pub const REVERT_DATA: &str = "0xrevert";

pub struct MockProvider {
    name: String,
    config: ProviderConfig,
    batch: bool,
    tracker: StatsTracker,
    down: AtomicBool,
    fail_next: AtomicU32,
    healthy: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicU64,
    batch_calls: AtomicU64,
    disconnects: AtomicU64,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: ProviderConfig::default(),
            batch: false,
            tracker: StatsTracker::new(),
            down: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            delay: None,
            calls: AtomicU64::new(0),
            batch_calls: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
        }
    }

    pub fn with_config(mut self, config: ProviderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn batching(mut self) -> Self {
        self.batch = true;
        self
    }

    pub fn down(self) -> Self {
        self.down.store(true, Ordering::SeqCst);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_probe_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> u64 {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn provider_id(&self) -> ProviderId {
        self.id()
    }

    fn answer(&self, method: &str) -> Result<Value, RelayError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RelayError::Transport(format!("{} is down", self.name)));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RelayError::Transport(format!("{} flaked", self.name)));
        }
        match method {
            "eth_blockNumber" => Ok(Value::from("0x10")),
            "eth_chainId" => Ok(Value::from("0x1")),
            REVERT_METHOD => Err(RelayError::Rpc(RpcFault {
                code: 3,
                message: "execution reverted".into(),
                data: Some(Value::from(REVERT_DATA)),
            })),
            other => Ok(Value::from(format!("{}:{other}", self.name))),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Custom
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            batch: self.batch,
            ..Default::default()
        }
    }

    fn tracker(&self) -> &StatsTracker {
        &self.tracker
    }

    async fn connect(&self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RelayError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn call(&self, method: &str, _params: Vec<Value>) -> Result<Value, RelayError> {
        self.tracker
            .track(async {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.answer(method)
            })
            .await
    }

    async fn batch(&self, reqs: &[RpcRequest]) -> Result<Vec<Result<Value, RelayError>>, RelayError> {
        if !self.batch {
            return Err(RelayError::Unsupported("batch".into()));
        }
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(RelayError::Transport(format!("{} is down", self.name)));
        }
        Ok(reqs.iter().map(|r| self.answer(&r.method)).collect())
    }

    async fn health_check(&self) -> bool {
        let healthy = self.healthy.load(Ordering::SeqCst);
        self.tracker.set_healthy(healthy);
        healthy
    }
}

pub fn as_dyn(providers: &[Arc<MockProvider>]) -> Vec<Arc<dyn Provider>> {
    providers
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn Provider>)
        .collect()
}

/// Defaults with no retry delay and no cache.
pub fn quick_config() -> ProviderManagerConfig {
    let mut config = ProviderManagerConfig::default();
    config.cache.enabled = false;
    config.fallback.retry_delay_ms = 0;
    config
}
