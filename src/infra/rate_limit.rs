//! Token-bucket admission control, one bucket per named resource
//! (e.g. `binance:order`).
//!
//! Buckets refill lazily from wall-clock time; there is no background task.
//! Each bucket carries its own lock so acquisitions on different resources
//! never contend.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A single token bucket: `capacity` bounds burst, `fill_rate` (tokens per
/// second) bounds sustained throughput.
pub struct TokenBucket {
    capacity: f64,
    fill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: f64, fill_rate: f64) -> Self {
        Self {
            capacity,
            fill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.fill_rate).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Non-blocking consume. Declines without side effects when the bucket
    /// holds fewer than `cost` tokens.
    pub fn try_consume(&self, cost: f64) -> bool {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Current token count after a lazy refill. Observability only.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill(&mut state);
        state.tokens
    }

    fn next_delay(&self, cost: f64) -> Duration {
        let tokens = self.available();
        let needed = (cost - tokens).max(0.0);
        let delay = if self.fill_rate > 0.0 {
            needed / self.fill_rate
        } else {
            0.05
        };
        Duration::from_secs_f64(delay.clamp(0.01, 0.5))
    }

    /// Cooperative acquire: retries `try_consume` with short sleeps until
    /// success or `timeout` elapses. Returns `false` on timeout, never errors.
    pub async fn acquire(&self, cost: f64, timeout: Option<Duration>) -> bool {
        let start = Instant::now();
        loop {
            if self.try_consume(cost) {
                return true;
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return false;
                }
            }
            tokio::time::sleep(self.next_delay(cost)).await;
        }
    }
}

/// Registry of independent token buckets keyed by resource name.
///
/// Unregistered keys pass through: admission control is opt-in per resource.
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &str, capacity: f64, fill_rate: f64) {
        self.buckets
            .insert(key.to_string(), Arc::new(TokenBucket::new(capacity, fill_rate)));
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.buckets.contains_key(key)
    }

    pub fn try_consume(&self, key: &str, cost: f64) -> bool {
        match self.buckets.get(key) {
            Some(bucket) => bucket.try_consume(cost),
            None => true,
        }
    }

    pub async fn acquire(&self, key: &str, cost: f64, timeout: Option<Duration>) -> bool {
        // Clone the Arc out so the map shard lock is not held across awaits.
        let bucket = match self.buckets.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return true,
        };
        bucket.acquire(cost, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(5.0, 1000.0);
        // Burn everything, then let the refill run; it must clamp at capacity.
        for _ in 0..5 {
            assert!(bucket.try_consume(1.0));
        }
        std::thread::sleep(Duration::from_millis(50));
        let tokens = bucket.available();
        assert!(tokens <= 5.0, "tokens {} exceeded capacity", tokens);
        assert!(tokens >= 0.0);
    }

    #[test]
    fn empty_bucket_declines_without_side_effects() {
        let bucket = TokenBucket::new(2.0, 0.0);
        assert!(bucket.try_consume(2.0));
        assert!(!bucket.try_consume(1.0));
        assert!(!bucket.try_consume(1.0));
        assert!(bucket.available() >= 0.0);
    }

    #[test]
    fn zero_capacity_bucket_never_succeeds() {
        let bucket = TokenBucket::new(0.0, 0.0);
        assert!(!bucket.try_consume(1.0));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!bucket.try_consume(1.0));
    }

    #[test]
    fn refill_eventually_allows_consume() {
        let bucket = TokenBucket::new(1.0, 100.0);
        assert!(bucket.try_consume(1.0));
        assert!(!bucket.try_consume(1.0));
        // cost / fill_rate = 10ms; wait a bit longer.
        std::thread::sleep(Duration::from_millis(30));
        assert!(bucket.try_consume(1.0));
    }

    #[test]
    fn unregistered_keys_pass_through() {
        let limiter = RateLimiter::new();
        assert!(limiter.try_consume("nobody:registered", 1.0));
    }

    #[tokio::test]
    async fn acquire_times_out_with_false() {
        let limiter = RateLimiter::new();
        limiter.register("x", 0.0, 0.0);
        let ok = limiter
            .acquire("x", 1.0, Some(Duration::from_millis(30)))
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn acquire_succeeds_after_refill() {
        let limiter = RateLimiter::new();
        limiter.register("y", 1.0, 50.0);
        assert!(limiter.try_consume("y", 1.0));
        let ok = limiter
            .acquire("y", 1.0, Some(Duration::from_millis(500)))
            .await;
        assert!(ok);
    }
}
