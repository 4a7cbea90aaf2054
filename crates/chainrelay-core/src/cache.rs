//! Method-aware TTL + LRU response cache.
//!
//! Keys are `"{method}:{json(params)}"` (see [`RpcRequest::cache_key`]). The
//! method and params are recovered from the key to pick a TTL tier: never
//! cache state-changing or "latest"-state queries, cache fast-moving values
//! briefly, and keep immutable values for a long time.
//!
//! [`RpcRequest::cache_key`]: crate::request::RpcRequest::cache_key

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::CacheConfig;

/// Fixed per-entry overhead added to the key and value size estimate.
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// TTL tier of a method call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Never stored.
    NoCache,
    /// Frequently changing values.
    Short,
    /// Effectively immutable values.
    Long,
    /// Unclassified methods; use the configured default TTL.
    Default,
}

const NO_CACHE_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_sendRawTransaction",
    "eth_sign",
    "eth_signTransaction",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
    "eth_accounts",
    "eth_requestAccounts",
    "eth_estimateGas",
    "eth_newFilter",
    "eth_newBlockFilter",
    "eth_newPendingTransactionFilter",
    "eth_getFilterChanges",
    "eth_getFilterLogs",
    "eth_uninstallFilter",
    "eth_subscribe",
    "eth_unsubscribe",
];

const NO_CACHE_PREFIXES: &[&str] = &["personal_", "wallet_"];

const SHORT_TTL_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_gasPrice",
    "eth_maxPriorityFeePerGas",
    "eth_feeHistory",
    "eth_blobBaseFee",
    "eth_syncing",
    "net_peerCount",
    "net_listening",
];

const LONG_TTL_METHODS: &[&str] = &[
    "eth_chainId",
    "net_version",
    "web3_clientVersion",
    "eth_getCode",
    "eth_getTransactionByHash",
    "eth_getTransactionReceipt",
    "eth_getBlockByHash",
    "eth_getBlockTransactionCountByHash",
    "eth_getTransactionByBlockHashAndIndex",
];

/// Methods whose result depends on a block parameter, with its position.
/// `eth_getLogs` carries its range inside the filter object instead.
const BLOCK_SCOPED_METHODS: &[(&str, usize)] = &[
    ("eth_getBalance", 1),
    ("eth_getTransactionCount", 1),
    ("eth_call", 1),
    ("eth_getStorageAt", 2),
    ("eth_getBlockByNumber", 0),
    ("eth_getBlockTransactionCountByNumber", 0),
    ("eth_getTransactionByBlockNumberAndIndex", 0),
    ("eth_getLogs", 0),
];

/// Tags whose meaning moves with the chain head.
const MOVING_TAGS: &[&str] = &["latest", "pending", "safe", "finalized"];

/// True if `block` names one fixed block. A missing block argument means
/// `latest` to the node, so it is not pinned.
fn is_pinned(block: Option<&Value>) -> bool {
    match block {
        Some(Value::String(tag)) => !MOVING_TAGS.contains(&tag.as_str()),
        // EIP-1898 block object.
        Some(Value::Object(obj)) => {
            obj.contains_key("blockHash") || is_pinned(obj.get("blockNumber"))
        }
        Some(Value::Number(_)) => true,
        _ => false,
    }
}

fn logs_range_pinned(filter: Option<&Value>) -> bool {
    let Some(filter) = filter.and_then(Value::as_object) else {
        return false;
    };
    filter.contains_key("blockHash")
        || (is_pinned(filter.get("fromBlock")) && is_pinned(filter.get("toBlock")))
}

/// Classify a call by method name and serialized params.
pub fn classify(method: &str, params_json: &str) -> CacheTier {
    if NO_CACHE_METHODS.contains(&method)
        || NO_CACHE_PREFIXES.iter().any(|p| method.starts_with(p))
    {
        return CacheTier::NoCache;
    }
    if SHORT_TTL_METHODS.contains(&method) {
        return CacheTier::Short;
    }
    if LONG_TTL_METHODS.contains(&method) {
        return CacheTier::Long;
    }
    if let Some(&(_, position)) = BLOCK_SCOPED_METHODS.iter().find(|(m, _)| *m == method) {
        let Ok(params) = serde_json::from_str::<Vec<Value>>(params_json) else {
            return CacheTier::NoCache;
        };
        let pinned = if method == "eth_getLogs" {
            logs_range_pinned(params.first())
        } else {
            is_pinned(params.get(position))
        };
        return match (pinned, method) {
            (true, _) => CacheTier::Long,
            // The head block itself is worth a brief cache.
            (false, "eth_getBlockByNumber") => CacheTier::Short,
            (false, _) => CacheTier::NoCache,
        };
    }
    CacheTier::Default
}

/// Split a cache key into method and serialized params.
pub fn split_key(key: &str) -> (&str, &str) {
    key.split_once(':').unwrap_or((key, ""))
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
    hit_count: u64,
    size_bytes: usize,
    /// Recency tick; larger is more recent.
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// tick → key, oldest first.
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    memory_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        }
        self.evictions += 1;
        true
    }
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// hits / (hits + misses), 0 when unused.
    pub hit_rate: f64,
    pub average_hits_per_entry: f64,
}

/// Shared response cache.
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// TTL for a tier, `None` for [`CacheTier::NoCache`].
    pub fn ttl_for(&self, tier: CacheTier) -> Option<Duration> {
        match tier {
            CacheTier::NoCache => None,
            CacheTier::Short => Some(self.config.short_ttl()),
            CacheTier::Long => Some(self.config.long_ttl()),
            CacheTier::Default => Some(self.config.ttl()),
        }
    }

    /// `true` if a response for this key would be stored.
    pub fn is_cacheable(&self, key: &str) -> bool {
        let (method, params) = split_key(key);
        classify(method, params) != CacheTier::NoCache
    }

    /// Fresh value for `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.expires_at <= now,
        };
        if expired {
            inner.remove(key);
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.touch(key);
        let entry = inner.entries.get_mut(key)?;
        entry.hit_count += 1;
        Some(entry.value.clone())
    }

    /// Store `value` under `key`. Returns `true` if stored.
    ///
    /// With `ttl = None` the TTL comes from the method's tier; no-cache
    /// methods and `null` values are skipped. An explicit `ttl` always stores.
    pub fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> bool {
        let ttl = match ttl {
            Some(ttl) => ttl,
            None => {
                if value.is_null() {
                    return false;
                }
                let (method, params) = split_key(key);
                match self.ttl_for(classify(method, params)) {
                    Some(ttl) => ttl,
                    None => return false,
                }
            }
        };
        if ttl.is_zero() || self.config.max_size == 0 {
            return false;
        }

        let size_bytes = estimate_size(key, &value);
        if size_bytes > self.config.max_memory_bytes {
            tracing::debug!(key, size_bytes, "response larger than cache budget, not cached");
            return false;
        }

        let mut inner = self.inner.lock();
        let hit_count = inner.remove(key).map(|e| e.hit_count).unwrap_or(0);

        while !inner.entries.is_empty()
            && (inner.entries.len() >= self.config.max_size
                || inner.memory_bytes + size_bytes > self.config.max_memory_bytes)
        {
            if !inner.evict_lru() {
                break;
            }
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, key.to_string());
        inner.memory_bytes += size_bytes;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                hit_count,
                size_bytes,
                tick,
            },
        );
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.memory_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        let entry_hits: u64 = inner.entries.values().map(|e| e.hit_count).sum();
        CacheStats {
            entries: inner.entries.len(),
            memory_bytes: inner.memory_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            average_hits_per_entry: if inner.entries.is_empty() {
                0.0
            } else {
                entry_hits as f64 / inner.entries.len() as f64
            },
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ResponseCache")
            .field("entries", &inner.entries.len())
            .field("memory_bytes", &inner.memory_bytes)
            .finish()
    }
}

fn estimate_size(key: &str, value: &Value) -> usize {
    let value_len = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
    key.len() + value_len + ENTRY_OVERHEAD_BYTES
}
