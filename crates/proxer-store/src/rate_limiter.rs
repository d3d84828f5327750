//! Keyed token-bucket admission (spec §4.4).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    burst: f64,
    rate: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rate: f64, now: Instant) -> Self {
        let burst = (2.0 * rate).max(1.0);
        Self {
            tokens: burst,
            burst,
            rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
            self.last_refill = now;
        }
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// A single process-wide token-bucket limiter keyed by an arbitrary string
/// (tenant id, route tunnel_key, etc). A global mutex guards all buckets;
/// per spec §4.4 contention here is not the design bottleneck.
#[derive(Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits one request against `key`'s bucket at the given `rate`
    /// (tokens/sec). Creates the bucket with `burst = max(1, 2*rate)` on
    /// first use. A `rate` of zero always rejects.
    pub fn allow(&self, key: &str, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(rate, now));
        // A rate change (e.g. plan upgrade) updates future refills without
        // resetting accumulated tokens.
        bucket.rate = rate;
        bucket.burst = (2.0 * rate).max(1.0);
        bucket.try_consume(now)
    }

    pub fn reset(&self, key: &str) {
        self.buckets.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn burst_allows_up_to_double_rate_immediately() {
        let limiter = RateLimiter::new();
        // rate=1 -> burst=2
        assert!(limiter.allow("k", 1.0));
        assert!(limiter.allow("k", 1.0));
        assert!(!limiter.allow("k", 1.0));
    }

    #[test]
    fn zero_rate_rejects_everything() {
        let limiter = RateLimiter::new();
        assert!(!limiter.allow("k", 0.0));
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("k", 10.0));
        assert!(limiter.allow("k", 10.0));
        sleep(Duration::from_millis(150));
        // after ~150ms at rate=10/s, roughly 1.5 tokens should have refilled
        assert!(limiter.allow("k", 10.0));
    }

    #[test]
    fn independent_keys_have_independent_buckets() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("a", 1.0));
        assert!(limiter.allow("a", 1.0));
        assert!(!limiter.allow("a", 1.0));
        assert!(limiter.allow("b", 1.0));
    }
}
