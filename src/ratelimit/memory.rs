//! In-process token-bucket store.
//!
//! Runs the same refill arithmetic as the Redis script against a local
//! bucket map. The per-call mutation happens under the map lock, which
//! plays the role of the store-side atomic execution. Suitable for tests
//! and single-node deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ratelimit::{epoch_seconds, RateLimitPolicy, RateLimitResponse, RateLimiter};

#[derive(Debug)]
struct Bucket {
    tokens: i64,
    timestamp: u64,
}

pub struct InMemoryRateLimiter {
    policy: RateLimitPolicy,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, key: &str, rate: i64, burst: i64, requested: i64, now: u64) -> (bool, i64) {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: burst,
            timestamp: 0,
        });
        let delta = now.saturating_sub(bucket.timestamp).min(i64::MAX as u64) as i64;
        let filled = bucket.tokens.saturating_add(delta.saturating_mul(rate)).min(burst);
        let (allowed, remaining) = if filled >= requested {
            (true, filled - requested)
        } else {
            (false, filled)
        };
        bucket.tokens = remaining;
        bucket.timestamp = now;
        (allowed, remaining)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn is_allowed(&self, route_id: &str, key: &str) -> RateLimitResponse {
        let config = self.policy.config_for(route_id).clone();
        let (allowed, tokens_left) = self.check(
            key,
            config.replenish_rate as i64,
            config.burst_capacity as i64,
            1,
            epoch_seconds(),
        );
        RateLimitResponse {
            allowed,
            tokens_left,
            headers: self.policy.headers(&config, tokens_left),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use crate::ratelimit::BucketConfig;

    fn limiter(rate: u64, burst: u64) -> InMemoryRateLimiter {
        InMemoryRateLimiter::new(RateLimitPolicy {
            default: BucketConfig {
                replenish_rate: rate,
                burst_capacity: burst,
            },
            routes: HashMap::new(),
            include_headers: true,
        })
    }

    #[test]
    fn burst_is_consumed_then_denied() {
        let limiter = limiter(1, 2);
        assert_eq!(limiter.check("u1", 1, 2, 1, 100), (true, 1));
        assert_eq!(limiter.check("u1", 1, 2, 1, 100), (true, 0));
        assert_eq!(limiter.check("u1", 1, 2, 1, 100), (false, 0));
    }

    #[test]
    fn tokens_refill_with_elapsed_seconds() {
        let limiter = limiter(1, 2);
        limiter.check("u1", 1, 2, 1, 100);
        limiter.check("u1", 1, 2, 1, 100);
        assert_eq!(limiter.check("u1", 1, 2, 1, 100), (false, 0));
        // One second later a single token is available again.
        assert_eq!(limiter.check("u1", 1, 2, 1, 101), (true, 0));
        // Refill never exceeds the burst capacity.
        assert_eq!(limiter.check("u1", 1, 2, 1, 1000), (true, 1));
    }

    #[test]
    fn keys_have_independent_buckets() {
        let limiter = limiter(1, 1);
        assert_eq!(limiter.check("a", 1, 1, 1, 100).0, true);
        assert_eq!(limiter.check("a", 1, 1, 1, 100).0, false);
        assert_eq!(limiter.check("b", 1, 1, 1, 100).0, true);
    }

    #[tokio::test]
    async fn concurrent_calls_never_exceed_the_bucket_bound() {
        let burst = 5u64;
        let rate = 1u64;
        let limiter = Arc::new(limiter(rate, burst));
        let started = Instant::now();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            tasks.push(tokio::spawn(async move {
                limiter.is_allowed("r1", "shared").await.allowed
            }));
        }
        let mut allowed = 0u64;
        for task in tasks {
            if task.await.unwrap() {
                allowed += 1;
            }
        }

        let elapsed = started.elapsed().as_secs() + 1;
        assert!(
            allowed <= burst + elapsed * rate,
            "allowed {allowed} exceeds bucket bound"
        );
    }

    #[tokio::test]
    async fn response_headers_reflect_remaining_tokens() {
        let limiter = limiter(1, 2);
        let first = limiter.is_allowed("r1", "u1").await;
        assert!(first.allowed);
        let names: Vec<&str> = first.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"x-ratelimit-remaining"));
        assert!(names.contains(&"x-ratelimit-replenish-rate"));
        assert!(names.contains(&"x-ratelimit-burst-capacity"));
    }
}
