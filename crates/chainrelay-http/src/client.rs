//! HTTP JSON-RPC provider backed by `reqwest`.
//!
//! One request per `call`, one HTTP round trip per `batch` (JSON array body).
//! Retries, rate limiting and failover live in the manager, not here.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use chainrelay_core::request::parse_quantity;
use chainrelay_core::{
    Provider, ProviderCapabilities, ProviderConfig, ProviderKind, RelayError, RpcRequest, StatsTracker,
};

use crate::wire::{order_batch, JsonRpcRequest, JsonRpcResponse};

const IDLE: u8 = 0;
const CONNECTED: u8 = 1;
const CLOSED: u8 = 2;

/// A [`Provider`] speaking JSON-RPC 2.0 over HTTP.
///
/// Calls work without an explicit [`connect`](Provider::connect); connecting
/// probes `eth_chainId` and checks it against `config.chain_id`. After
/// [`disconnect`](Provider::disconnect) calls fail with
/// [`RelayError::NotConnected`] until the next `connect`.
pub struct HttpProvider {
    kind: ProviderKind,
    name: String,
    url: String,
    config: ProviderConfig,
    capabilities: ProviderCapabilities,
    http: reqwest::Client,
    next_id: AtomicU64,
    state: AtomicU8,
    tracker: StatsTracker,
}

impl HttpProvider {
    /// Build a provider for `url`. The HTTP client timeout follows
    /// `config.timeout_ms`.
    pub fn new(
        kind: ProviderKind,
        name: impl Into<String>,
        url: impl Into<String>,
        config: ProviderConfig,
    ) -> Result<Self, RelayError> {
        let url = url.into();
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| RelayError::Config(format!("invalid provider url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RelayError::Config(format!(
                "unsupported url scheme {:?}, expected http or https",
                parsed.scheme()
            )));
        }
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            kind,
            name: name.into(),
            url,
            config,
            capabilities: ProviderCapabilities {
                batch: true,
                logs: true,
                ..Default::default()
            },
            http,
            next_id: AtomicU64::new(1),
            state: AtomicU8::new(IDLE),
            tracker: StatsTracker::new(),
        })
    }

    /// Override the declared capabilities (e.g. archive or trace access).
    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.state.load(Ordering::Acquire) == CLOSED {
            return Err(RelayError::NotConnected(self.id().to_string()));
        }
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        self.config.timeout_ms
    }

    async fn post<B, R>(&self, body: &B) -> Result<R, RelayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Transport(format!("HTTP {status}: {body}")));
        }

        resp.json::<R>().await.map_err(|e| self.map_reqwest(e))
    }

    fn map_reqwest(&self, e: reqwest::Error) -> RelayError {
        if e.is_timeout() {
            RelayError::Timeout {
                ms: self.timeout_ms(),
            }
        } else {
            // Strip the URL: hosted endpoints carry API keys in the path.
            RelayError::Transport(e.without_url().to_string())
        }
    }

    async fn send_one(&self, method: &str, params: &[Value]) -> Result<Value, RelayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp: JsonRpcResponse = self.post(&JsonRpcRequest::new(id, method, params)).await?;
        resp.into_result()
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn tracker(&self) -> &StatsTracker {
        &self.tracker
    }

    async fn connect(&self) -> Result<(), RelayError> {
        self.state.store(IDLE, Ordering::Release);
        let chain_id = parse_quantity(&self.send_one("eth_chainId", &[]).await?)?;
        if let Some(expected) = self.config.chain_id {
            if expected != chain_id {
                return Err(RelayError::Config(format!(
                    "provider {} serves chain {chain_id}, expected {expected}",
                    self.id()
                )));
            }
        }
        self.state.store(CONNECTED, Ordering::Release);
        tracing::info!(provider = %self.id(), chain_id, "provider connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RelayError> {
        if self.state.swap(CLOSED, Ordering::AcqRel) != CLOSED {
            tracing::debug!(provider = %self.id(), "provider disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == CONNECTED
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RelayError> {
        self.ensure_open()?;
        self.tracker.track(self.send_one(method, &params)).await
    }

    /// True HTTP batch: all requests as a JSON array in one HTTP call.
    async fn batch(&self, reqs: &[RpcRequest]) -> Result<Vec<Result<Value, RelayError>>, RelayError> {
        self.ensure_open()?;
        if reqs.is_empty() {
            return Ok(Vec::new());
        }

        let first = self.next_id.fetch_add(reqs.len() as u64, Ordering::Relaxed);
        let ids: Vec<u64> = (first..first + reqs.len() as u64).collect();
        let body: Vec<JsonRpcRequest<'_>> = reqs
            .iter()
            .zip(&ids)
            .map(|(req, id)| JsonRpcRequest::new(*id, &req.method, &req.params))
            .collect();

        let responses: Vec<JsonRpcResponse> = self.tracker.track(self.post(&body)).await?;
        tracing::trace!(provider = %self.id(), size = reqs.len(), "batch sent");
        Ok(order_batch(&ids, responses))
    }
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("id", &self.id())
            .field("timeout", &Duration::from_millis(self.config.timeout_ms))
            .field("connected", &self.is_connected())
            .finish()
    }
}
