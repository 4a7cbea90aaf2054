//! Provider selection across a set of backends.
//!
//! Strategies:
//! - Round robin: equal rotation over healthy providers
//! - Weighted round robin: rotation proportional to `weight`
//! - Least connections: fewest in-flight requests
//! - Least response time: fastest average; untested providers go first
//! - Priority: lowest `priority` number
//! - Cost optimized: cheapest estimated cost per request
//!
//! Selecting a provider reserves it (one active connection) and hands back a
//! [`Reservation`]. The reservation is settled exactly once, as a success, a
//! failure, or a plain release; dropping it unsettled releases it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::MonitoringConfig;
use crate::provider::{Provider, ProviderId};

/// Cap on a single weight when building the weighted sequence.
const MAX_WEIGHT: u64 = 1000;

/// Load-balancing strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    LeastResponseTime,
    Priority,
    CostOptimized,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Self::RoundRobin,
        Self::WeightedRoundRobin,
        Self::LeastConnections,
        Self::LeastResponseTime,
        Self::Priority,
        Self::CostOptimized,
    ];
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RoundRobin => "round_robin",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::LeastConnections => "least_connections",
            Self::LeastResponseTime => "least_response_time",
            Self::Priority => "priority",
            Self::CostOptimized => "cost_optimized",
        };
        f.write_str(s)
    }
}

/// When live traffic ejects a provider and when it comes back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    pub failure_rate_threshold: Option<f64>,
    pub min_requests: u64,
    pub recovery_successes: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self::from(&MonitoringConfig::default())
    }
}

impl From<&MonitoringConfig> for HealthPolicy {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            failure_rate_threshold: config.failure_rate_threshold,
            min_requests: config.min_requests,
            recovery_successes: config.recovery_successes.max(1),
        }
    }
}

/// Snapshot of one provider's balancer metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub id: ProviderId,
    pub active_connections: u64,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Lifetime mean over successful responses.
    pub average_response_time_ms: f64,
    pub last_response_time_ms: f64,
    pub is_healthy: bool,
    pub weight: u32,
    pub priority: u32,
    pub cost_per_request: Option<f64>,
}

#[derive(Debug)]
struct MetricsState {
    active_connections: u64,
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    average_response_time_ms: f64,
    last_response_time_ms: f64,
    is_healthy: bool,
    /// Why the provider is out of rotation, while it is.
    ejection: Option<Ejection>,
    consecutive_successes: u32,
}

/// Only failure-rate ejections heal through live traffic. A forced or
/// probe-driven mark stays until the provider is marked healthy again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ejection {
    FailureRate,
    Marked,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self {
            active_connections: 0,
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            average_response_time_ms: 0.0,
            last_response_time_ms: 0.0,
            is_healthy: true,
            ejection: None,
            consecutive_successes: 0,
        }
    }
}

struct Slot {
    id: ProviderId,
    provider: Arc<dyn Provider>,
    weight: u32,
    priority: u32,
    cost_per_request: Option<f64>,
    batch: bool,
    state: Mutex<MetricsState>,
}

impl Slot {
    fn new(provider: Arc<dyn Provider>) -> Self {
        let config = provider.config();
        Self {
            id: provider.id(),
            weight: config.weight,
            priority: config.priority,
            cost_per_request: config
                .cost_per_request
                .or_else(|| provider.kind().estimated_cost_per_request()),
            batch: provider.capabilities().batch,
            state: Mutex::new(MetricsState::default()),
            provider,
        }
    }

    fn is_healthy(&self) -> bool {
        self.state.lock().is_healthy
    }

    fn reserve(&self) {
        self.state.lock().active_connections += 1;
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.active_connections = state.active_connections.saturating_sub(1);
    }

    fn settle_success(&self, response_time: Duration, policy: &HealthPolicy) {
        let ms = response_time.as_secs_f64() * 1000.0;
        let mut state = self.state.lock();
        state.active_connections = state.active_connections.saturating_sub(1);
        state.total_requests += 1;
        state.success_count += 1;
        state.last_response_time_ms = ms;
        let n = state.success_count as f64;
        state.average_response_time_ms += (ms - state.average_response_time_ms) / n;

        state.consecutive_successes = state.consecutive_successes.saturating_add(1);
        if state.ejection == Some(Ejection::FailureRate)
            && state.consecutive_successes >= policy.recovery_successes
        {
            state.is_healthy = true;
            state.ejection = None;
            tracing::info!(provider = %self.id, "provider recovered");
        }
    }

    fn settle_failure(&self, policy: &HealthPolicy) {
        let mut state = self.state.lock();
        state.active_connections = state.active_connections.saturating_sub(1);
        state.total_requests += 1;
        state.failure_count += 1;
        state.consecutive_successes = 0;

        if let Some(threshold) = policy.failure_rate_threshold {
            let rate = state.failure_count as f64 / state.total_requests as f64;
            if state.is_healthy && state.total_requests > policy.min_requests && rate > threshold {
                state.is_healthy = false;
                state.ejection = Some(Ejection::FailureRate);
                tracing::warn!(
                    provider = %self.id,
                    failure_rate = rate,
                    "provider ejected on failure rate"
                );
            }
        }
    }

    fn set_healthy(&self, healthy: bool) -> bool {
        let mut state = self.state.lock();
        let changed = state.is_healthy != healthy;
        state.is_healthy = healthy;
        state.ejection = (!healthy).then_some(Ejection::Marked);
        state.consecutive_successes = 0;
        changed
    }

    fn snapshot(&self) -> ProviderMetrics {
        let state = self.state.lock();
        ProviderMetrics {
            id: self.id.clone(),
            active_connections: state.active_connections,
            total_requests: state.total_requests,
            success_count: state.success_count,
            failure_count: state.failure_count,
            average_response_time_ms: state.average_response_time_ms,
            last_response_time_ms: state.last_response_time_ms,
            is_healthy: state.is_healthy,
            weight: self.weight,
            priority: self.priority,
            cost_per_request: self.cost_per_request,
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        *state = MetricsState {
            is_healthy: state.is_healthy,
            ejection: state.ejection,
            ..MetricsState::default()
        };
    }
}

#[derive(Default)]
struct Roster {
    slots: Vec<Arc<Slot>>,
    /// Slot indexes, each repeated in proportion to its weight.
    weighted: Vec<usize>,
}

impl Roster {
    fn find(&self, id: &ProviderId) -> Option<&Arc<Slot>> {
        self.slots.iter().find(|s| &s.id == id)
    }
}

/// Constraints for one selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionFilter {
    /// Prefer other providers; fall back to these only if nothing else qualifies.
    pub avoid: HashSet<ProviderId>,
    /// Never select these.
    pub skip: HashSet<ProviderId>,
    /// Only providers that declare batch support.
    pub require_batch: bool,
}

impl SelectionFilter {
    pub fn batch_capable() -> Self {
        Self {
            require_batch: true,
            ..Self::default()
        }
    }
}

/// A reserved provider: one unit of its `active_connections`.
#[must_use = "a reservation should be settled with succeed, fail or release"]
pub struct Reservation {
    slot: Arc<Slot>,
    policy: HealthPolicy,
    settled: bool,
}

impl Reservation {
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.slot.provider
    }

    pub fn id(&self) -> &ProviderId {
        &self.slot.id
    }

    /// Record a successful call.
    pub fn succeed(mut self, response_time: Duration) {
        self.settled = true;
        self.slot.settle_success(response_time, &self.policy);
    }

    /// Record a failed call.
    pub fn fail(mut self) {
        self.settled = true;
        self.slot.settle_failure(&self.policy);
    }

    /// Give the connection back without recording an outcome.
    pub fn release(mut self) {
        self.settled = true;
        self.slot.release();
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.slot.release();
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("provider", &self.slot.id)
            .field("settled", &self.settled)
            .finish()
    }
}

/// Stateful provider selector.
pub struct LoadBalancer {
    strategy: Strategy,
    policy: HealthPolicy,
    roster: RwLock<Roster>,
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(providers: Vec<Arc<dyn Provider>>, strategy: Strategy, policy: HealthPolicy) -> Self {
        let balancer = Self {
            strategy,
            policy,
            roster: RwLock::new(Roster::default()),
            cursor: AtomicUsize::new(0),
        };
        balancer.update_providers(providers);
        balancer
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.roster.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn healthy_count(&self) -> usize {
        self.roster.read().slots.iter().filter(|s| s.is_healthy()).count()
    }

    /// Replace the tracked set. Providers still present keep their metrics.
    pub fn update_providers(&self, providers: Vec<Arc<dyn Provider>>) {
        let mut roster = self.roster.write();
        let slots: Vec<Arc<Slot>> = providers
            .into_iter()
            .map(|provider| {
                let id = provider.id();
                match roster.find(&id) {
                    Some(existing) if Arc::ptr_eq(&existing.provider, &provider) => Arc::clone(existing),
                    _ => Arc::new(Slot::new(provider)),
                }
            })
            .collect();
        let weighted = build_weighted_sequence(&slots);
        *roster = Roster { slots, weighted };
    }

    /// Select with no constraints.
    pub fn select_provider(&self) -> Option<Reservation> {
        self.select(&SelectionFilter::default())
    }

    /// Select a healthy provider under the configured strategy.
    pub fn select(&self, filter: &SelectionFilter) -> Option<Reservation> {
        let roster = self.roster.read();
        let candidates: Vec<usize> = roster
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.is_healthy() && !filter.skip.contains(&s.id) && (!filter.require_batch || s.batch)
            })
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let preferred: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| !filter.avoid.contains(&roster.slots[i].id))
            .collect();
        let pool = if preferred.is_empty() { &candidates } else { &preferred };

        let idx = self.pick(&roster, pool);
        let slot = Arc::clone(&roster.slots[idx]);
        slot.reserve();
        tracing::trace!(provider = %slot.id, strategy = %self.strategy, "provider selected");
        Some(Reservation {
            slot,
            policy: self.policy,
            settled: false,
        })
    }

    fn pick(&self, roster: &Roster, pool: &[usize]) -> usize {
        let slots = &roster.slots;
        match self.strategy {
            Strategy::RoundRobin => self.round_robin(pool),
            Strategy::WeightedRoundRobin => {
                let len = roster.weighted.len();
                for _ in 0..len {
                    let pos = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
                    let idx = roster.weighted[pos];
                    if pool.contains(&idx) {
                        return idx;
                    }
                }
                // Only zero-weight providers qualify.
                self.round_robin(pool)
            }
            Strategy::LeastConnections => pool
                .iter()
                .copied()
                .min_by_key(|&i| slots[i].state.lock().active_connections)
                .unwrap_or(pool[0]),
            Strategy::LeastResponseTime => pool
                .iter()
                .copied()
                .min_by(|&a, &b| latency_key(&slots[a]).total_cmp(&latency_key(&slots[b])))
                .unwrap_or(pool[0]),
            Strategy::Priority => pool
                .iter()
                .copied()
                .min_by_key(|&i| slots[i].priority)
                .unwrap_or(pool[0]),
            Strategy::CostOptimized => pool
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    let cost = |i: usize| slots[i].cost_per_request.unwrap_or(f64::INFINITY);
                    cost(a).total_cmp(&cost(b))
                })
                .unwrap_or(pool[0]),
        }
    }

    fn round_robin(&self, pool: &[usize]) -> usize {
        pool[self.cursor.fetch_add(1, Ordering::Relaxed) % pool.len()]
    }

    fn with_slot<R>(&self, id: &ProviderId, f: impl FnOnce(&Slot) -> R) -> Option<R> {
        let roster = self.roster.read();
        roster.find(id).map(|slot| f(slot))
    }

    /// Record a success for a provider reserved outside a [`Reservation`].
    pub fn record_success(&self, id: &ProviderId, response_time: Duration) -> bool {
        self.with_slot(id, |slot| slot.settle_success(response_time, &self.policy))
            .is_some()
    }

    /// Record a failure for a provider reserved outside a [`Reservation`].
    pub fn record_failure(&self, id: &ProviderId) -> bool {
        self.with_slot(id, |slot| slot.settle_failure(&self.policy))
            .is_some()
    }

    /// Returns `true` if the provider was healthy before.
    pub fn mark_unhealthy(&self, id: &ProviderId) -> bool {
        let changed = self.with_slot(id, |slot| slot.set_healthy(false)).unwrap_or(false);
        if changed {
            tracing::warn!(provider = %id, "provider marked unhealthy");
        }
        changed
    }

    /// Returns `true` if the provider was unhealthy before.
    pub fn mark_healthy(&self, id: &ProviderId) -> bool {
        let changed = self.with_slot(id, |slot| slot.set_healthy(true)).unwrap_or(false);
        if changed {
            tracing::info!(provider = %id, "provider marked healthy");
        }
        changed
    }

    pub fn is_healthy(&self, id: &ProviderId) -> Option<bool> {
        self.with_slot(id, |slot| slot.is_healthy())
    }

    pub fn metrics(&self) -> Vec<ProviderMetrics> {
        self.roster.read().slots.iter().map(|s| s.snapshot()).collect()
    }

    pub fn provider_metrics(&self, id: &ProviderId) -> Option<ProviderMetrics> {
        self.with_slot(id, |slot| slot.snapshot())
    }

    /// Zero every counter. Health flags are kept.
    pub fn reset_metrics(&self) {
        for slot in &self.roster.read().slots {
            slot.reset();
        }
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategy", &self.strategy)
            .field("providers", &self.len())
            .finish()
    }
}

/// Untested providers sort first so they get a trial.
fn latency_key(slot: &Slot) -> f64 {
    let state = slot.state.lock();
    if state.success_count == 0 {
        f64::NEG_INFINITY
    } else {
        state.average_response_time_ms
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Smooth weighted sequence: weights reduced by their gcd, then interleaved
/// so heavy providers are spread out rather than clustered.
fn build_weighted_sequence(slots: &[Arc<Slot>]) -> Vec<usize> {
    let weights: Vec<u64> = slots
        .iter()
        .map(|s| u64::from(s.weight).min(MAX_WEIGHT))
        .collect();
    let divisor = weights.iter().copied().fold(0, gcd);
    if divisor == 0 {
        return Vec::new();
    }
    let weights: Vec<i64> = weights.iter().map(|w| (w / divisor) as i64).collect();
    let total: i64 = weights.iter().sum();

    let mut current = vec![0i64; weights.len()];
    let mut sequence = Vec::with_capacity(total as usize);
    for _ in 0..total {
        let mut best: Option<usize> = None;
        for (i, w) in weights.iter().enumerate() {
            if *w == 0 {
                continue;
            }
            current[i] += w;
            if best.map_or(true, |b| current[i] > current[b]) {
                best = Some(i);
            }
        }
        if let Some(b) = best {
            current[b] -= total;
            sequence.push(b);
        }
    }
    sequence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::provider::{ProviderCapabilities, ProviderConfig, ProviderKind, StatsTracker};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Stub {
        name: String,
        kind: ProviderKind,
        config: ProviderConfig,
        batch: bool,
        tracker: StatsTracker,
    }

    #[async_trait]
    impl Provider for Stub {
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
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn call(&self, _method: &str, _params: Vec<Value>) -> Result<Value, RelayError> {
            Ok(Value::Null)
        }
    }

    fn stub(name: &str, config: ProviderConfig) -> Arc<dyn Provider> {
        Arc::new(Stub {
            name: name.into(),
            kind: ProviderKind::Custom,
            config,
            batch: false,
            tracker: StatsTracker::new(),
        })
    }

    fn plain(names: &[&str]) -> Vec<Arc<dyn Provider>> {
        names.iter().map(|n| stub(n, ProviderConfig::default())).collect()
    }

    fn id(name: &str) -> ProviderId {
        ProviderId::new(ProviderKind::Custom, name)
    }

    fn pick(lb: &LoadBalancer) -> String {
        let r = lb.select_provider().expect("a provider");
        let name = r.provider().name().to_string();
        r.release();
        name
    }

    #[test]
    fn round_robin_visits_each_once() {
        let lb = LoadBalancer::new(plain(&["a", "b", "c"]), Strategy::RoundRobin, HealthPolicy::default());
        let mut seen = Vec::new();
        for i in 0..3 {
            let r = lb.select_provider().unwrap();
            seen.push(r.provider().name().to_string());
            // Outcome must not influence the rotation.
            if i % 2 == 0 {
                r.fail();
            } else {
                r.succeed(Duration::from_millis(5));
            }
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
        // Stable order across rounds.
        let round: Vec<String> = (0..3).map(|_| pick(&lb)).collect();
        let next: Vec<String> = (0..3).map(|_| pick(&lb)).collect();
        assert_eq!(round, next);
    }

    #[test]
    fn weighted_round_robin_respects_weights() {
        let providers = vec![
            stub("a", ProviderConfig { weight: 3, ..Default::default() }),
            stub("b", ProviderConfig { weight: 1, ..Default::default() }),
        ];
        let lb = LoadBalancer::new(providers, Strategy::WeightedRoundRobin, HealthPolicy::default());
        let picks: Vec<String> = (0..12).map(|_| pick(&lb)).collect();
        for window in picks.windows(4) {
            let a = window.iter().filter(|p| *p == "a").count();
            assert_eq!(a, 3, "window {window:?}");
        }
    }

    #[test]
    fn weighted_sequence_reduces_by_gcd() {
        let providers = vec![
            stub("a", ProviderConfig { weight: 30, ..Default::default() }),
            stub("b", ProviderConfig { weight: 10, ..Default::default() }),
            stub("c", ProviderConfig { weight: 0, ..Default::default() }),
        ];
        let slots: Vec<Arc<Slot>> = providers.into_iter().map(|p| Arc::new(Slot::new(p))).collect();
        assert_eq!(build_weighted_sequence(&slots), vec![0, 0, 1, 0]);
    }

    #[test]
    fn weighted_skips_unhealthy() {
        let providers = vec![
            stub("a", ProviderConfig { weight: 3, ..Default::default() }),
            stub("b", ProviderConfig { weight: 1, ..Default::default() }),
        ];
        let lb = LoadBalancer::new(providers, Strategy::WeightedRoundRobin, HealthPolicy::default());
        lb.mark_unhealthy(&id("a"));
        for _ in 0..5 {
            assert_eq!(pick(&lb), "b");
        }
    }

    #[test]
    fn least_connections_prefers_idle() {
        let lb = LoadBalancer::new(plain(&["a", "b"]), Strategy::LeastConnections, HealthPolicy::default());
        let first = lb.select_provider().unwrap();
        assert_eq!(first.provider().name(), "a");
        let second = lb.select_provider().unwrap();
        assert_eq!(second.provider().name(), "b");
        first.succeed(Duration::from_millis(1));
        assert_eq!(pick(&lb), "a");
        second.release();
    }

    #[test]
    fn least_response_time_tries_untested_first() {
        let lb = LoadBalancer::new(plain(&["a", "b"]), Strategy::LeastResponseTime, HealthPolicy::default());
        lb.select_provider().unwrap().succeed(Duration::from_millis(50));
        // "b" has no samples yet.
        let r = lb.select_provider().unwrap();
        assert_eq!(r.provider().name(), "b");
        r.succeed(Duration::from_millis(10));
        assert_eq!(pick(&lb), "b");
    }

    #[test]
    fn priority_picks_lowest_number() {
        let providers = vec![
            stub("backup", ProviderConfig { priority: 2, ..Default::default() }),
            stub("primary", ProviderConfig { priority: 1, ..Default::default() }),
        ];
        let lb = LoadBalancer::new(providers, Strategy::Priority, HealthPolicy::default());
        assert_eq!(pick(&lb), "primary");
        lb.mark_unhealthy(&id("primary"));
        assert_eq!(pick(&lb), "backup");
    }

    #[test]
    fn cost_optimized_uses_kind_estimates_and_overrides() {
        let alchemy: Arc<dyn Provider> = Arc::new(Stub {
            name: "a".into(),
            kind: ProviderKind::Alchemy,
            config: ProviderConfig::default(),
            batch: false,
            tracker: StatsTracker::new(),
        });
        let infura: Arc<dyn Provider> = Arc::new(Stub {
            name: "i".into(),
            kind: ProviderKind::Infura,
            config: ProviderConfig::default(),
            batch: false,
            tracker: StatsTracker::new(),
        });
        let ipc: Arc<dyn Provider> = Arc::new(Stub {
            name: "local".into(),
            kind: ProviderKind::Ipc,
            config: ProviderConfig::default(),
            batch: false,
            tracker: StatsTracker::new(),
        });
        let lb = LoadBalancer::new(vec![alchemy, ipc, infura], Strategy::CostOptimized, HealthPolicy::default());
        assert_eq!(pick(&lb), "i");

        let free = stub("free", ProviderConfig { cost_per_request: Some(0.0), ..Default::default() });
        let lb = LoadBalancer::new(vec![free], Strategy::CostOptimized, HealthPolicy::default());
        assert_eq!(lb.metrics()[0].cost_per_request, Some(0.0));
    }

    #[test]
    fn none_when_all_unhealthy() {
        let lb = LoadBalancer::new(plain(&["a", "b"]), Strategy::RoundRobin, HealthPolicy::default());
        lb.mark_unhealthy(&id("a"));
        lb.mark_unhealthy(&id("b"));
        assert!(lb.select_provider().is_none());
        assert_eq!(lb.healthy_count(), 0);
    }

    #[test]
    fn avoid_is_soft_and_skip_is_hard() {
        let lb = LoadBalancer::new(plain(&["a", "b"]), Strategy::Priority, HealthPolicy::default());
        let mut filter = SelectionFilter::default();
        filter.avoid.insert(id("a"));
        let r = lb.select(&filter).unwrap();
        assert_eq!(r.provider().name(), "b");
        r.release();

        filter.avoid.insert(id("b"));
        let r = lb.select(&filter).unwrap();
        assert_eq!(r.provider().name(), "a", "falls back to avoided providers");
        r.release();

        let mut filter = SelectionFilter::default();
        filter.skip.insert(id("a"));
        filter.skip.insert(id("b"));
        assert!(lb.select(&filter).is_none());
    }

    #[test]
    fn require_batch_filters_providers() {
        let batcher: Arc<dyn Provider> = Arc::new(Stub {
            name: "batcher".into(),
            kind: ProviderKind::Custom,
            config: ProviderConfig::default(),
            batch: true,
            tracker: StatsTracker::new(),
        });
        let lb = LoadBalancer::new(
            vec![stub("single", ProviderConfig::default()), batcher],
            Strategy::RoundRobin,
            HealthPolicy::default(),
        );
        for _ in 0..3 {
            let r = lb.select(&SelectionFilter::batch_capable()).unwrap();
            assert_eq!(r.provider().name(), "batcher");
            r.release();
        }
    }

    #[test]
    fn active_connections_settle_exactly_once() {
        let lb = LoadBalancer::new(plain(&["a"]), Strategy::RoundRobin, HealthPolicy::default());
        let r1 = lb.select_provider().unwrap();
        let r2 = lb.select_provider().unwrap();
        assert_eq!(lb.metrics()[0].active_connections, 2);

        r1.fail();
        drop(r2);
        let m = &lb.metrics()[0];
        assert_eq!(m.active_connections, 0);
        assert_eq!(m.failure_count, 1);
        assert_eq!(m.total_requests, 1);

        // Stray records never drive the counter negative.
        lb.record_failure(&id("a"));
        assert_eq!(lb.metrics()[0].active_connections, 0);
    }

    #[test]
    fn average_is_mean_of_successes() {
        let lb = LoadBalancer::new(plain(&["a"]), Strategy::RoundRobin, HealthPolicy::default());
        lb.select_provider().unwrap().succeed(Duration::from_millis(10));
        lb.select_provider().unwrap().fail();
        lb.select_provider().unwrap().succeed(Duration::from_millis(30));
        let m = &lb.metrics()[0];
        assert!((m.average_response_time_ms - 20.0).abs() < 1e-6);
        assert!((m.last_response_time_ms - 30.0).abs() < 1e-6);
        assert_eq!(m.success_count, 2);
    }

    #[test]
    fn failure_rate_ejects_and_success_recovers() {
        let policy = HealthPolicy {
            failure_rate_threshold: Some(0.5),
            min_requests: 4,
            recovery_successes: 1,
        };
        let lb = LoadBalancer::new(plain(&["a"]), Strategy::RoundRobin, policy);
        let held = lb.select_provider().unwrap();
        for _ in 0..5 {
            lb.select_provider().unwrap().fail();
        }
        assert_eq!(lb.is_healthy(&id("a")), Some(false));
        assert!(lb.select_provider().is_none());

        // An in-flight request that completes successfully restores it.
        held.succeed(Duration::from_millis(1));
        assert_eq!(lb.is_healthy(&id("a")), Some(true));
    }

    #[test]
    fn marked_provider_stays_out_despite_in_flight_success() {
        let lb = LoadBalancer::new(plain(&["a", "b"]), Strategy::RoundRobin, HealthPolicy::default());
        let first = lb.select_provider().unwrap();
        let second = lb.select_provider().unwrap();
        let held = if first.id() == &id("a") { first } else { second };

        assert!(lb.mark_unhealthy(&id("a")));
        held.succeed(Duration::from_millis(1));
        assert_eq!(lb.is_healthy(&id("a")), Some(false));
        assert!((0..4).all(|_| pick(&lb) == "b"));

        assert!(lb.mark_healthy(&id("a")));
        assert_eq!(lb.is_healthy(&id("a")), Some(true));
    }

    #[test]
    fn update_providers_keeps_existing_metrics() {
        let providers = plain(&["a", "b"]);
        let lb = LoadBalancer::new(providers.clone(), Strategy::RoundRobin, HealthPolicy::default());
        lb.select_provider().unwrap().succeed(Duration::from_millis(1));

        let mut next = providers;
        next.push(stub("c", ProviderConfig::default()));
        lb.update_providers(next);

        let metrics = lb.metrics();
        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics[0].success_count, 1);
        assert_eq!(metrics[2].total_requests, 0);

        lb.reset_metrics();
        assert_eq!(lb.metrics()[0].success_count, 0);
    }
}
