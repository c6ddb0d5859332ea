//! Distributed request rate limiting.
//!
//! # Responsibilities
//! - Define the limiter contract consumed by the `RequestRateLimiter` filter
//! - Resolve the limit key for an exchange (client IP, header)
//! - Share per-route token-bucket parameters between store backends
//!
//! # Design Decisions
//! - The backing store is best-effort: an unreachable store allows the
//!   request and reports `tokens_left = -1`
//! - Bucket state is two integers per key (`tokens`, `timestamp` in epoch
//!   seconds); refill arithmetic is integral

pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::exchange::Exchange;

pub use self::memory::InMemoryRateLimiter;
pub use self::redis::RedisRateLimiter;

pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const REPLENISH_RATE_HEADER: &str = "x-ratelimit-replenish-rate";
pub const BURST_CAPACITY_HEADER: &str = "x-ratelimit-burst-capacity";

/// Outcome of a rate-limit check.
#[derive(Debug)]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub tokens_left: i64,
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check whether one request under `key` is allowed on `route_id`.
    async fn is_allowed(&self, route_id: &str, key: &str) -> RateLimitResponse;
}

/// Resolves the rate-limit key for an exchange. An empty result is handled
/// by the filter's empty-key policy.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, exchange: &Exchange) -> Result<Option<String>, GatewayError>;
}

/// Keys requests by the connected client's IP address.
pub struct RemoteAddrKeyResolver;

#[async_trait]
impl KeyResolver for RemoteAddrKeyResolver {
    async fn resolve(&self, exchange: &Exchange) -> Result<Option<String>, GatewayError> {
        Ok(exchange.client_addr.map(|addr| addr.ip().to_string()))
    }
}

/// Keys requests by a request header value.
pub struct HeaderKeyResolver {
    header: HeaderName,
}

impl HeaderKeyResolver {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

#[async_trait]
impl KeyResolver for HeaderKeyResolver {
    async fn resolve(&self, exchange: &Exchange) -> Result<Option<String>, GatewayError> {
        Ok(exchange
            .request
            .headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string))
    }
}

/// Token-bucket parameters for one route.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketConfig {
    /// Tokens added per second.
    pub replenish_rate: u64,
    /// Bucket size; also the initial fill.
    pub burst_capacity: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            replenish_rate: 1,
            burst_capacity: 1,
        }
    }
}

/// Per-route bucket configuration with a fallback default.
#[derive(Debug, Clone, Default)]
pub struct RateLimitPolicy {
    pub default: BucketConfig,
    pub routes: HashMap<String, BucketConfig>,
    pub include_headers: bool,
}

impl RateLimitPolicy {
    pub fn config_for(&self, route_id: &str) -> &BucketConfig {
        self.routes.get(route_id).unwrap_or(&self.default)
    }

    /// Informational headers merged into the response by the filter.
    pub fn headers(&self, config: &BucketConfig, tokens_left: i64) -> Vec<(HeaderName, HeaderValue)> {
        if !self.include_headers {
            return Vec::new();
        }
        [
            (REMAINING_HEADER, tokens_left.to_string()),
            (REPLENISH_RATE_HEADER, config.replenish_rate.to_string()),
            (BURST_CAPACITY_HEADER, config.burst_capacity.to_string()),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            Some((HeaderName::from_static(name), value.parse().ok()?))
        })
        .collect()
    }
}

pub(crate) fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[tokio::test]
    async fn remote_addr_resolver_uses_client_ip() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let exchange = Exchange::new(request, Some("10.1.2.3:55000".parse().unwrap()));
        let key = RemoteAddrKeyResolver.resolve(&exchange).await.unwrap();
        assert_eq!(key.as_deref(), Some("10.1.2.3"));
    }

    #[tokio::test]
    async fn header_resolver_returns_none_when_absent() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let exchange = Exchange::new(request, None);
        let resolver = HeaderKeyResolver::new(HeaderName::from_static("x-api-key"));
        assert!(resolver.resolve(&exchange).await.unwrap().is_none());
    }

    #[test]
    fn policy_falls_back_to_default_config() {
        let mut policy = RateLimitPolicy {
            include_headers: true,
            ..Default::default()
        };
        policy.routes.insert(
            "special".into(),
            BucketConfig {
                replenish_rate: 10,
                burst_capacity: 20,
            },
        );
        assert_eq!(policy.config_for("special").burst_capacity, 20);
        assert_eq!(policy.config_for("other").burst_capacity, 1);
    }

    #[test]
    fn headers_report_bucket_state() {
        let policy = RateLimitPolicy {
            include_headers: true,
            ..Default::default()
        };
        let headers = policy.headers(&policy.default, 7);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].0.as_str(), REMAINING_HEADER);
        assert_eq!(headers[0].1, "7");
    }

    #[test]
    fn headers_suppressed_when_disabled() {
        let policy = RateLimitPolicy::default();
        assert!(policy.headers(&policy.default, 7).is_empty());
    }
}
