//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::Deserialize;

use crate::ratelimit::{BucketConfig, RateLimitPolicy};
use crate::routing::{FilterDefinition, RouteDefinition};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route definitions.
    pub routes: Vec<RouteDefinition>,

    /// Filters applied to every route, ahead of the per-route filters.
    pub default_filters: Vec<FilterDefinition>,

    /// Upstream HTTP client settings.
    pub http_client: HttpClientConfig,

    /// Request rate limiter settings.
    pub rate_limiter: RateLimiterConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream HTTP client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Time allowed for upstream response headers, in milliseconds.
    pub response_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 30_000,
        }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Redis connection URL; in-memory buckets when unset.
    pub redis_url: Option<String>,

    /// Whether to add X-RateLimit-* headers to responses.
    pub include_headers: bool,

    /// How the limit key is derived from the exchange.
    pub key_resolver: KeyResolverConfig,

    /// Bucket parameters for routes without a dedicated entry.
    pub default: BucketConfig,

    /// Per-route bucket parameters, keyed by route id.
    pub routes: HashMap<String, BucketConfig>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            include_headers: true,
            key_resolver: KeyResolverConfig::default(),
            default: BucketConfig::default(),
            routes: HashMap::new(),
        }
    }
}

impl RateLimiterConfig {
    /// The policy shared by the limiter backends.
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            default: self.default.clone(),
            routes: self.routes.clone(),
            include_headers: self.include_headers,
        }
    }
}

/// Limit key derivation strategy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum KeyResolverConfig {
    /// Key by client IP address.
    #[default]
    RemoteAddr,
    /// Key by a request header value.
    Header { name: String },
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
