//! Multi-provider orchestration: cache, selection, rate limiting, failover
//! and health monitoring.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::balancer::{HealthPolicy, LoadBalancer, ProviderMetrics, SelectionFilter};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::ProviderManagerConfig;
use crate::error::RelayError;
use crate::eth::EthApi;
use crate::policy::{BackoffStrategy, HealthState, ProbeTracker, RateLimiter, RateLimiterConfig};
use crate::provider::{Provider, ProviderId, ProviderStats};
use crate::request::RpcRequest;

struct Entry {
    provider: Arc<dyn Provider>,
    limiter: Option<Arc<RateLimiter>>,
    probe: ProbeTracker,
}

impl Entry {
    fn new(provider: Arc<dyn Provider>, unhealthy_threshold: u32) -> Self {
        let limiter = provider.config().rate_limit.map(|limit| {
            Arc::new(RateLimiter::new(
                provider.id().as_str(),
                RateLimiterConfig::from(limit),
            ))
        });
        Self {
            provider,
            limiter,
            probe: ProbeTracker::new(unhealthy_threshold),
        }
    }
}

struct Background {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Background {
    fn stop(self) {
        self.token.cancel();
        self.handle.abort();
    }
}

#[derive(Default)]
struct Tasks {
    health: Option<Background>,
    cleanup: Option<Background>,
}

struct Inner {
    config: ProviderManagerConfig,
    entries: RwLock<IndexMap<ProviderId, Arc<Entry>>>,
    balancer: LoadBalancer,
    cache: Option<ResponseCache>,
    backoff: Arc<dyn BackoffStrategy>,
    tasks: Mutex<Tasks>,
    destroyed: AtomicBool,
}

impl Inner {
    fn entry(&self, id: &ProviderId) -> Option<Arc<Entry>> {
        self.entries.read().get(id).cloned()
    }

    fn sync_balancer(&self, entries: &IndexMap<ProviderId, Arc<Entry>>) {
        self.balancer
            .update_providers(entries.values().map(|e| Arc::clone(&e.provider)).collect());
    }

    async fn run_health_checks(&self) -> IndexMap<ProviderId, bool> {
        let entries: Vec<(ProviderId, Arc<Entry>)> = self
            .entries
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();

        let probes = entries.iter().map(|(id, entry)| async move {
            let timeout = entry.provider.config().timeout();
            let healthy = tokio::time::timeout(timeout, entry.provider.health_check())
                .await
                .unwrap_or(false);
            (id, entry, healthy)
        });

        let mut report = IndexMap::with_capacity(entries.len());
        for (id, entry, healthy) in join_all(probes).await {
            entry.provider.tracker().set_healthy(healthy);
            if healthy {
                entry.probe.record_success();
                self.balancer.mark_healthy(id);
            } else {
                entry.probe.record_failure();
                tracing::debug!(
                    provider = %id,
                    consecutive_failures = entry.probe.consecutive_failures(),
                    "health probe failed"
                );
                // Re-applied on every failed probe past the threshold.
                if entry.probe.state() == HealthState::Unhealthy {
                    self.balancer.mark_unhealthy(id);
                }
            }
            report.insert(id.clone(), healthy);
        }
        report
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut();
        for task in [tasks.health.take(), tasks.cleanup.take()].into_iter().flatten() {
            task.stop();
        }
    }
}

/// Dispatches requests across a set of providers.
///
/// Cheap to clone; clones share state. Background tasks hold only a weak
/// reference and stop once the last clone is dropped.
#[derive(Clone)]
pub struct ProviderManager {
    inner: Arc<Inner>,
}

impl ProviderManager {
    /// Build a manager with the backoff described by `config.fallback`.
    pub fn new(
        providers: Vec<Arc<dyn Provider>>,
        config: ProviderManagerConfig,
    ) -> Result<Self, RelayError> {
        let backoff = config.fallback.backoff_strategy();
        Self::with_backoff(providers, config, backoff)
    }

    /// Build a manager with a custom backoff strategy.
    ///
    /// Health monitoring (when enabled) and cache cleanup are started on the
    /// current Tokio runtime.
    pub fn with_backoff(
        providers: Vec<Arc<dyn Provider>>,
        config: ProviderManagerConfig,
        backoff: Arc<dyn BackoffStrategy>,
    ) -> Result<Self, RelayError> {
        config.validate()?;

        let threshold = config.monitoring.unhealthy_threshold;
        let mut entries: IndexMap<ProviderId, Arc<Entry>> = IndexMap::with_capacity(providers.len());
        for provider in providers {
            provider.config().validate()?;
            let id = provider.id();
            if entries.contains_key(&id) {
                return Err(RelayError::DuplicateProvider(id.to_string()));
            }
            entries.insert(id, Arc::new(Entry::new(provider, threshold)));
        }

        let balancer = LoadBalancer::new(
            entries.values().map(|e| Arc::clone(&e.provider)).collect(),
            config.strategy,
            HealthPolicy::from(&config.monitoring),
        );
        let cache = config
            .cache
            .enabled
            .then(|| ResponseCache::new(config.cache.clone()));

        let manager = Self {
            inner: Arc::new(Inner {
                config,
                entries: RwLock::new(entries),
                balancer,
                cache,
                backoff,
                tasks: Mutex::new(Tasks::default()),
                destroyed: AtomicBool::new(false),
            }),
        };

        manager.start_cache_cleanup();
        if manager.inner.config.monitoring.enabled {
            manager.start_health_monitoring()?;
        }

        tracing::info!(
            providers = manager.len(),
            strategy = %manager.inner.config.strategy,
            cache = manager.inner.cache.is_some(),
            "provider manager ready"
        );
        Ok(manager)
    }

    pub fn config(&self) -> &ProviderManagerConfig {
        &self.inner.config
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered provider ids in registration order.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.inner.entries.read().keys().cloned().collect()
    }

    pub fn provider(&self, id: &ProviderId) -> Option<Arc<dyn Provider>> {
        self.inner.entry(id).map(|e| Arc::clone(&e.provider))
    }

    pub fn rate_limiter(&self, id: &ProviderId) -> Option<Arc<RateLimiter>> {
        self.inner.entry(id).and_then(|e| e.limiter.clone())
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<(), RelayError> {
        if self.is_destroyed() {
            Err(RelayError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let cache = self.inner.cache.as_ref()?;
        if !cache.is_cacheable(key) {
            return None;
        }
        let value = cache.get(key)?;
        tracing::debug!(key, "cache hit");
        Some(value)
    }

    fn store(&self, key: &str, value: &Value) {
        if let Some(cache) = &self.inner.cache {
            cache.set(key, value.clone(), None);
        }
    }

    /// Execute one request with caching and failover.
    pub async fn request(&self, req: RpcRequest) -> Result<Value, RelayError> {
        self.ensure_live()?;
        let key = req.cache_key();
        if let Some(value) = self.cached(&key) {
            return Ok(value);
        }

        let value = self.dispatch(&req).await?;
        self.store(&key, &value);
        Ok(value)
    }

    async fn dispatch(&self, req: &RpcRequest) -> Result<Value, RelayError> {
        let fallback = &self.inner.config.fallback;
        let max_attempts = fallback.max_attempts();
        let mut filter = SelectionFilter::default();
        let mut failures: HashMap<ProviderId, u32> = HashMap::new();
        let mut attempts = 0u32;
        let mut last_error: Option<RelayError> = None;

        while attempts < max_attempts {
            self.ensure_live()?;

            let Some(reservation) = self.inner.balancer.select(&filter) else {
                return Err(match last_error {
                    None => RelayError::AllProvidersUnavailable,
                    // Only rate-limit skips so far.
                    Some(e) if attempts == 0 => e,
                    Some(e) => RelayError::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    },
                });
            };
            let id = reservation.id().clone();
            let provider = Arc::clone(reservation.provider());

            if let Some(limiter) = self.rate_limiter(&id) {
                if let Err(e) = limiter.acquire_timeout(fallback.rate_limit_wait()).await {
                    reservation.release();
                    tracing::warn!(provider = %id, error = %e, "rate limited, trying another provider");
                    filter.skip.insert(id);
                    last_error = Some(e);
                    continue;
                }
            }

            attempts += 1;
            let timeout = provider.config().timeout();
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                timeout,
                provider.call(&req.method, req.params.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RelayError::Timeout {
                    ms: timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(value) => {
                    reservation.succeed(started.elapsed());
                    if attempts > 1 {
                        tracing::info!(provider = %id, attempt = attempts, method = %req.method, "request recovered");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    reservation.fail();
                    tracing::warn!(
                        provider = %id,
                        attempt = attempts,
                        max_attempts,
                        method = %req.method,
                        error = %e,
                        "provider attempt failed"
                    );

                    let count = failures.entry(id.clone()).or_default();
                    *count += 1;
                    if *count > provider.config().retries {
                        filter.skip.insert(id.clone());
                    }
                    filter.avoid.insert(id);
                    last_error = Some(e);

                    if attempts < max_attempts {
                        let delay = self.inner.backoff.delay(attempts);
                        if !delay.is_zero() {
                            tracing::debug!(wait_ms = delay.as_millis() as u64, "backing off");
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        Err(RelayError::RetriesExhausted {
            attempts,
            last: Box::new(last_error.unwrap_or(RelayError::AllProvidersUnavailable)),
        })
    }

    /// Execute several requests. One result per request, in input order.
    ///
    /// Cache hits are served first. The rest go as one grouped call to a
    /// batch-capable provider when one is available, otherwise (or if the
    /// grouped call fails) as concurrent independent requests.
    pub async fn batch(&self, requests: &[RpcRequest]) -> Vec<Result<Value, RelayError>> {
        if self.is_destroyed() {
            return requests.iter().map(|_| Err(RelayError::Destroyed)).collect();
        }

        let keys: Vec<String> = requests.iter().map(RpcRequest::cache_key).collect();
        let mut results: Vec<Option<Result<Value, RelayError>>> =
            (0..requests.len()).map(|_| None).collect();
        let mut pending = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            match self.cached(key) {
                Some(value) => results[i] = Some(Ok(value)),
                None => pending.push(i),
            }
        }

        if pending.len() > 1 {
            let group: Vec<RpcRequest> = pending.iter().map(|&i| requests[i].clone()).collect();
            if let Some(grouped) = self.grouped_call(&group).await {
                for (&i, result) in pending.iter().zip(grouped) {
                    if let Ok(value) = &result {
                        self.store(&keys[i], value);
                    }
                    results[i] = Some(result);
                }
                pending.clear();
            }
        }

        let fanned = join_all(pending.iter().map(|&i| self.request(requests[i].clone()))).await;
        for (&i, result) in pending.iter().zip(fanned) {
            results[i] = Some(result);
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(RelayError::Other("batch item was not executed".into()))))
            .collect()
    }

    async fn grouped_call(&self, group: &[RpcRequest]) -> Option<Vec<Result<Value, RelayError>>> {
        let reservation = self.inner.balancer.select(&SelectionFilter::batch_capable())?;
        let id = reservation.id().clone();
        let provider = Arc::clone(reservation.provider());

        if let Some(limiter) = self.rate_limiter(&id) {
            let wait = self.inner.config.fallback.rate_limit_wait();
            if limiter.acquire_timeout(wait).await.is_err() {
                reservation.release();
                return None;
            }
        }

        let timeout = provider.config().timeout();
        let started = Instant::now();
        match tokio::time::timeout(timeout, provider.batch(group)).await {
            Ok(Ok(results)) if results.len() == group.len() => {
                reservation.succeed(started.elapsed());
                tracing::debug!(provider = %id, size = group.len(), "grouped batch served");
                Some(results)
            }
            Ok(Ok(results)) => {
                reservation.fail();
                tracing::warn!(
                    provider = %id,
                    expected = group.len(),
                    got = results.len(),
                    "batch response size mismatch, fanning out"
                );
                None
            }
            Ok(Err(e)) => {
                reservation.fail();
                tracing::warn!(provider = %id, error = %e, "grouped batch failed, fanning out");
                None
            }
            Err(_) => {
                reservation.fail();
                tracing::warn!(provider = %id, timeout_ms = timeout.as_millis() as u64, "grouped batch timed out, fanning out");
                None
            }
        }
    }

    /// Probe every provider once. Returns each provider's probe outcome.
    pub async fn run_health_checks(&self) -> IndexMap<ProviderId, bool> {
        self.inner.run_health_checks().await
    }

    /// Start the periodic health probe. No-op if already running.
    pub fn start_health_monitoring(&self) -> Result<(), RelayError> {
        self.ensure_live()?;
        let handle = Handle::try_current()
            .map_err(|_| RelayError::Config("health monitoring requires a Tokio runtime".into()))?;

        let mut tasks = self.inner.tasks.lock();
        if tasks.health.is_some() {
            return Ok(());
        }

        let interval = self.inner.config.monitoring.health_check_interval();
        let token = CancellationToken::new();
        let task = handle.spawn(health_loop(
            Arc::downgrade(&self.inner),
            interval,
            token.clone(),
        ));
        tasks.health = Some(Background { token, handle: task });
        tracing::info!(interval_ms = interval.as_millis() as u64, "health monitoring started");
        Ok(())
    }

    /// Stop the periodic health probe. Returns `true` if it was running.
    pub fn stop_health_monitoring(&self) -> bool {
        let task = self.inner.tasks.lock().health.take();
        match task {
            Some(task) => {
                task.stop();
                tracing::info!("health monitoring stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.tasks.lock().health.is_some()
    }

    fn start_cache_cleanup(&self) {
        let Some(interval) = self
            .inner
            .cache
            .as_ref()
            .and_then(|c| c.config().cleanup_interval())
        else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            tracing::debug!("no Tokio runtime, expired cache entries are dropped on access only");
            return;
        };

        let token = CancellationToken::new();
        let task = handle.spawn(cleanup_loop(
            Arc::downgrade(&self.inner),
            interval,
            token.clone(),
        ));
        self.inner.tasks.lock().cleanup = Some(Background { token, handle: task });
    }

    /// Per-provider stats keyed by id, in registration order.
    pub fn stats(&self) -> IndexMap<ProviderId, ProviderStats> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(id, e)| (id.clone(), e.provider.stats()))
            .collect()
    }

    /// Load-balancer metrics, in registration order.
    pub fn metrics(&self) -> Vec<ProviderMetrics> {
        self.inner.balancer.metrics()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(ResponseCache::stats)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.inner.cache {
            cache.clear();
        }
    }

    pub fn reset_metrics(&self) {
        self.inner.balancer.reset_metrics();
    }

    /// Force a provider out of rotation until a probe succeeds or it is
    /// marked healthy again.
    pub fn mark_unhealthy(&self, id: &ProviderId) -> Result<(), RelayError> {
        let entry = self
            .inner
            .entry(id)
            .ok_or_else(|| RelayError::UnknownProvider(id.to_string()))?;
        entry.provider.tracker().set_healthy(false);
        self.inner.balancer.mark_unhealthy(id);
        Ok(())
    }

    pub fn mark_healthy(&self, id: &ProviderId) -> Result<(), RelayError> {
        let entry = self
            .inner
            .entry(id)
            .ok_or_else(|| RelayError::UnknownProvider(id.to_string()))?;
        entry.probe.record_success();
        entry.provider.tracker().set_healthy(true);
        self.inner.balancer.mark_healthy(id);
        Ok(())
    }

    /// Register a provider at runtime.
    pub fn add_provider(&self, provider: Arc<dyn Provider>) -> Result<(), RelayError> {
        self.ensure_live()?;
        provider.config().validate()?;
        let id = provider.id();

        let mut entries = self.inner.entries.write();
        if entries.contains_key(&id) {
            return Err(RelayError::DuplicateProvider(id.to_string()));
        }
        let threshold = self.inner.config.monitoring.unhealthy_threshold;
        entries.insert(id.clone(), Arc::new(Entry::new(provider, threshold)));
        self.inner.sync_balancer(&entries);
        drop(entries);

        tracing::info!(provider = %id, "provider added");
        Ok(())
    }

    /// Unregister a provider, stop its rate limiter and disconnect it.
    pub async fn remove_provider(&self, id: &ProviderId) -> Result<Arc<dyn Provider>, RelayError> {
        let entry = {
            let mut entries = self.inner.entries.write();
            let entry = entries
                .shift_remove(id)
                .ok_or_else(|| RelayError::UnknownProvider(id.to_string()))?;
            self.inner.sync_balancer(&entries);
            entry
        };

        if let Some(limiter) = &entry.limiter {
            limiter.reset();
        }
        if let Err(e) = entry.provider.disconnect().await {
            tracing::warn!(provider = %id, error = %e, "disconnect failed during removal");
        }
        tracing::info!(provider = %id, "provider removed");
        Ok(Arc::clone(&entry.provider))
    }

    /// Connect every provider concurrently. Returns the ones that failed.
    pub async fn connect_all(&self) -> Vec<(ProviderId, RelayError)> {
        let providers: Vec<(ProviderId, Arc<dyn Provider>)> = self
            .inner
            .entries
            .read()
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(&e.provider)))
            .collect();

        let results = join_all(providers.iter().map(|(_, p)| p.connect())).await;
        providers
            .into_iter()
            .zip(results)
            .filter_map(|((id, _), result)| {
                result.err().map(|e| {
                    tracing::warn!(provider = %id, error = %e, "connect failed");
                    (id, e)
                })
            })
            .collect()
    }

    /// Stop background tasks, disconnect every provider, reset every rate
    /// limiter and clear the cache. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (health, cleanup) = {
            let mut tasks = self.inner.tasks.lock();
            (tasks.health.take(), tasks.cleanup.take())
        };
        for task in [health, cleanup].into_iter().flatten() {
            task.stop();
        }

        let entries: Vec<(ProviderId, Arc<Entry>)> = self
            .inner
            .entries
            .read()
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(e)))
            .collect();
        for (_, entry) in &entries {
            if let Some(limiter) = &entry.limiter {
                limiter.reset();
            }
        }
        let disconnects = join_all(entries.iter().map(|(_, e)| e.provider.disconnect())).await;
        for ((id, _), result) in entries.iter().zip(disconnects) {
            if let Err(e) = result {
                tracing::warn!(provider = %id, error = %e, "disconnect failed during destroy");
            }
        }

        self.clear_cache();
        tracing::info!(providers = entries.len(), "provider manager destroyed");
    }
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderManager")
            .field("providers", &self.provider_ids())
            .field("strategy", &self.inner.config.strategy)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[async_trait]
impl EthApi for ProviderManager {
    async fn rpc(&self, method: &str, params: Vec<Value>) -> Result<Value, RelayError> {
        self.request(RpcRequest::new(method, params)).await
    }
}

async fn health_loop(inner: Weak<Inner>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.run_health_checks().await;
            }
        }
    }
}

async fn cleanup_loop(inner: Weak<Inner>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if let Some(cache) = &inner.cache {
                    let removed = cache.cleanup();
                    if removed > 0 {
                        tracing::debug!(removed, "expired cache entries swept");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderConfig, ProviderKind, StatsTracker};

    struct Fixed {
        name: &'static str,
        config: ProviderConfig,
        tracker: StatsTracker,
    }

    #[async_trait]
    impl Provider for Fixed {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Custom
        }
        fn name(&self) -> &str {
            self.name
        }
        fn config(&self) -> &ProviderConfig {
            &self.config
        }
        fn tracker(&self) -> &StatsTracker {
            &self.tracker
        }
        async fn connect(&self) -> Result<(), RelayError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), RelayError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn call(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RelayError> {
            self.tracker.track(async { Ok(Value::from("0x1")) }).await
        }
    }

    fn fixed(name: &'static str) -> Arc<dyn Provider> {
        Arc::new(Fixed {
            name,
            config: ProviderConfig::default(),
            tracker: StatsTracker::new(),
        })
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = ProviderManager::new(vec![fixed("a"), fixed("a")], ProviderManagerConfig::default())
            .unwrap_err();
        assert!(matches!(err, RelayError::DuplicateProvider(id) if id == "custom_a"));
    }

    #[test]
    fn rejects_invalid_provider_config() {
        let bad: Arc<dyn Provider> = Arc::new(Fixed {
            name: "bad",
            config: ProviderConfig {
                timeout_ms: 0,
                ..Default::default()
            },
            tracker: StatsTracker::new(),
        });
        assert!(ProviderManager::new(vec![bad], ProviderManagerConfig::default()).is_err());
    }

    #[test]
    fn monitoring_without_runtime_is_an_error() {
        let mut config = ProviderManagerConfig::default();
        config.monitoring.enabled = true;
        let err = ProviderManager::new(vec![fixed("a")], config).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn builds_without_runtime_when_monitoring_is_off() {
        let manager = ProviderManager::new(vec![fixed("a"), fixed("b")], ProviderManagerConfig::default())
            .unwrap();
        assert_eq!(manager.len(), 2);
        assert!(!manager.is_monitoring());
        assert_eq!(
            manager.provider_ids(),
            vec![ProviderId::from("custom_a"), ProviderId::from("custom_b")]
        );
    }

    #[tokio::test]
    async fn add_and_remove_provider() {
        let manager = ProviderManager::new(vec![fixed("a")], ProviderManagerConfig::default()).unwrap();
        manager.add_provider(fixed("b")).unwrap();
        assert!(matches!(
            manager.add_provider(fixed("b")),
            Err(RelayError::DuplicateProvider(_))
        ));
        assert_eq!(manager.metrics().len(), 2);

        let removed = manager.remove_provider(&ProviderId::from("custom_a")).await.unwrap();
        assert_eq!(removed.name(), "a");
        assert_eq!(manager.provider_ids(), vec![ProviderId::from("custom_b")]);
        assert_eq!(manager.metrics().len(), 1);
        assert!(manager.remove_provider(&ProviderId::from("custom_a")).await.is_err());
    }

    #[tokio::test]
    async fn eth_api_goes_through_request() {
        let manager = ProviderManager::new(vec![fixed("a")], ProviderManagerConfig::default()).unwrap();
        assert_eq!(manager.get_block_number().await.unwrap(), 1);
        assert_eq!(manager.stats()[&ProviderId::from("custom_a")].request_count, 1);
    }
}
