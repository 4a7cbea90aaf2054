//! Token bucket rate limiter with a FIFO wait queue.
//!
//! Models a token bucket: tokens accrue at `requests / window` up to
//! `requests`. Each request consumes one token. When the bucket is empty,
//! callers queue up and a background drain task hands out tokens in arrival
//! order as they refill.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::RelayError;
use crate::provider::RateLimit;

/// Float slack so that `0.999…` after refill still counts as a whole token.
const EPSILON: f64 = 1e-9;

/// Shortest drain sleep; keeps the wake-up loop from spinning on rounding.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Maximum tokens in the bucket (requests per window).
    pub capacity: f64,
    /// Token refill rate (tokens per second).
    pub refill_rate: f64,
}

impl RateLimiterConfig {
    /// `requests` per `window`.
    pub fn per_window(requests: u32, window: Duration) -> Self {
        let capacity = f64::from(requests.max(1));
        let secs = window.as_secs_f64().max(0.001);
        Self {
            capacity,
            refill_rate: capacity / secs,
        }
    }
}

impl From<RateLimit> for RateLimiterConfig {
    fn from(limit: RateLimit) -> Self {
        Self::per_window(limit.requests, limit.window())
    }
}

/// Lazily refilled token bucket. Not synchronized on its own.
#[derive(Debug)]
pub struct TokenBucket {
    config: RateLimiterConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            tokens: config.capacity,
            last_refill: Instant::now(),
            config,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_rate).min(self.config.capacity);
        self.last_refill = now;
    }

    fn has_token(&self) -> bool {
        self.tokens + EPSILON >= 1.0
    }

    fn take(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    /// Time until one whole token is available.
    fn wait_time(&self) -> Duration {
        let deficit = 1.0 - self.tokens;
        if deficit <= EPSILON {
            Duration::ZERO
        } else if self.config.refill_rate <= 0.0 {
            Duration::MAX
        } else {
            Duration::from_secs_f64(deficit / self.config.refill_rate).max(MIN_WAIT)
        }
    }

    fn fill(&mut self) {
        self.tokens = self.config.capacity;
        self.last_refill = Instant::now();
    }
}

struct LimiterState {
    bucket: TokenBucket,
    waiters: VecDeque<oneshot::Sender<()>>,
    drain: Option<JoinHandle<()>>,
}

struct Shared {
    provider: String,
    state: Mutex<LimiterState>,
}

/// Per-provider rate limiter.
///
/// Waiters are served strictly FIFO. Dropping the limiter stops its drain
/// task and fails any queued callers with
/// [`RelayError::RateLimiterClosed`].
pub struct RateLimiter {
    shared: Arc<Shared>,
}

impl RateLimiter {
    pub fn new(provider: impl Into<String>, config: RateLimiterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider: provider.into(),
                state: Mutex::new(LimiterState {
                    bucket: TokenBucket::new(config),
                    waiters: VecDeque::new(),
                    drain: None,
                }),
            }),
        }
    }

    /// `true` if a request could proceed right now. Does not consume.
    pub fn can_make_request(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.bucket.refill();
        state.waiters.is_empty() && state.bucket.has_token()
    }

    /// Take a token without waiting. Never jumps the queue.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.bucket.refill();
        if state.waiters.is_empty() && state.bucket.has_token() {
            state.bucket.take();
            true
        } else {
            false
        }
    }

    /// Take a token, waiting in line if the bucket is empty.
    pub async fn acquire(&self) -> Result<(), RelayError> {
        let rx = {
            let mut state = self.shared.state.lock();
            state.bucket.refill();
            if state.waiters.is_empty() && state.bucket.has_token() {
                state.bucket.take();
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            if state.drain.is_none() {
                tracing::debug!(
                    provider = %self.shared.provider,
                    queued = state.waiters.len(),
                    "rate limited, queueing"
                );
                state.drain = Some(tokio::spawn(drain(Arc::clone(&self.shared))));
            }
            rx
        };

        rx.await.map_err(|_| RelayError::RateLimiterClosed {
            provider: self.shared.provider.clone(),
        })
    }

    /// Like [`acquire`](Self::acquire) but gives up after `max_wait`.
    ///
    /// A caller that gives up leaves the queue without consuming a token.
    pub async fn acquire_timeout(&self, max_wait: Duration) -> Result<(), RelayError> {
        match tokio::time::timeout(max_wait, self.acquire()).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::RateLimitTimeout {
                provider: self.shared.provider.clone(),
                waited_ms: max_wait.as_millis() as u64,
            }),
        }
    }

    /// Fail every queued caller, stop the drain task and refill the bucket.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        if let Some(handle) = state.drain.take() {
            handle.abort();
        }
        state.waiters.clear();
        state.bucket.fill();
    }

    /// Currently available tokens (after refill).
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.shared.state.lock();
        state.bucket.refill();
        state.bucket.tokens
    }

    /// Number of callers waiting for a token.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Estimated wait before the next token becomes available.
    pub fn wait_time(&self) -> Duration {
        let mut state = self.shared.state.lock();
        state.bucket.refill();
        state.bucket.wait_time()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if let Some(handle) = state.drain.take() {
            handle.abort();
        }
        state.waiters.clear();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("RateLimiter")
            .field("provider", &self.shared.provider)
            .field("tokens", &state.bucket.tokens)
            .field("queued", &state.waiters.len())
            .finish()
    }
}

/// Hand out tokens to queued callers in order, sleeping until the next
/// token refills. Exits once the queue is empty.
async fn drain(shared: Arc<Shared>) {
    loop {
        let wait = {
            let mut state = shared.state.lock();
            state.bucket.refill();

            // Callers that timed out hold a closed receiver; skip them.
            state.waiters.retain(|tx| !tx.is_closed());
            while state.bucket.has_token() {
                let Some(tx) = state.waiters.pop_front() else {
                    break;
                };
                if tx.send(()).is_ok() {
                    state.bucket.take();
                }
            }

            if state.waiters.is_empty() {
                state.drain = None;
                return;
            }
            state.bucket.wait_time()
        };
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests: u32, window_ms: u64) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            "test",
            RateLimiterConfig::per_window(requests, Duration::from_millis(window_ms)),
        ))
    }

    #[test]
    fn acquire_within_capacity() {
        let rl = RateLimiter::new(
            "test",
            RateLimiterConfig { capacity: 10.0, refill_rate: 1.0 },
        );
        for _ in 0..10 {
            assert!(rl.try_acquire(), "should succeed within capacity");
        }
        assert!(!rl.try_acquire(), "should be rate limited");
        assert!(!rl.can_make_request());
    }

    #[test]
    fn can_make_request_does_not_consume() {
        let rl = RateLimiter::new("test", RateLimiterConfig { capacity: 1.0, refill_rate: 0.0001 });
        assert!(rl.can_make_request());
        assert!(rl.can_make_request());
        assert!(rl.try_acquire());
        assert!(!rl.can_make_request());
    }

    #[test]
    fn wait_time_when_empty() {
        let rl = RateLimiter::new("test", RateLimiterConfig { capacity: 1.0, refill_rate: 10.0 });
        rl.try_acquire();
        let wait = rl.wait_time();
        // ~100ms (1 token / 10 tokens per sec)
        assert!(
            wait.as_millis() >= 50 && wait.as_millis() <= 200,
            "unexpected wait time: {wait:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_request_waits_for_refill() {
        let rl = limiter(5, 1000);
        let start = Instant::now();
        for _ in 0..5 {
            rl.acquire().await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        rl.acquire().await.unwrap();
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(195) && waited <= Duration::from_millis(260),
            "sixth token after {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_arrival_order() {
        let rl = limiter(1, 100);
        rl.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let rl = Arc::clone(&rl);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                rl.acquire().await.unwrap();
                order.lock().push(i);
            }));
            // Let each task enqueue before spawning the next.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_waiter_does_not_consume() {
        let rl = limiter(1, 1000);
        rl.acquire().await.unwrap();

        let err = rl.acquire_timeout(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, RelayError::RateLimitTimeout { waited_ms: 100, .. }));

        // The abandoned slot must not swallow the next token.
        let start = Instant::now();
        rl.acquire().await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(920));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_fails_waiters_and_refills() {
        let rl = limiter(1, 60_000);
        rl.acquire().await.unwrap();

        let waiter = {
            let rl = Arc::clone(&rl);
            tokio::spawn(async move { rl.acquire().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(rl.queued(), 1);

        rl.reset();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(RelayError::RateLimiterClosed { .. })));
        assert!(rl.try_acquire());
    }
}
