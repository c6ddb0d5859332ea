//! Built-in gateway filter factories.
//!
//! `RewritePath`, `PrefixPath` and `AddRequestHeader` mutate the request on
//! the way in; `RequestRateLimiter` wraps the distributed token bucket and
//! may terminate the request before it reaches a terminal routing filter.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::factory::{FactoryFilter, GatewayFilterFactory};
use crate::filter::{FilterChain, GatewayFilter};
use crate::ratelimit::{KeyResolver, RateLimiter};

fn bind<T: for<'de> Deserialize<'de>>(name: &str, config: Value) -> Result<T, GatewayError> {
    serde_json::from_value(config)
        .map_err(|error| GatewayError::configuration(format!("invalid {name} config: {error}")))
}

/// Rewrites the request path through a regular expression.
pub struct RewritePathGatewayFilterFactory;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RewritePathConfig {
    regexp: String,
    replacement: String,
}

struct RewritePathFilter {
    regex: Regex,
    replacement: String,
}

#[async_trait]
impl GatewayFilter for RewritePathFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        exchange.add_original_request_url();
        let path = exchange.request.uri.path().to_string();
        let rewritten = self
            .regex
            .replace_all(&path, self.replacement.as_str())
            .into_owned();
        if rewritten != path {
            tracing::debug!(from = %path, to = %rewritten, "rewrote request path");
            exchange.set_request_path(&rewritten)?;
        }
        chain.filter(exchange).await
    }
}

impl GatewayFilterFactory for RewritePathGatewayFilterFactory {
    fn name(&self) -> &'static str {
        "RewritePath"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["regexp", "replacement"]
    }

    fn apply(&self, config: Value) -> Result<FactoryFilter, GatewayError> {
        let config: RewritePathConfig = bind(self.name(), config)?;
        let regex = Regex::new(&config.regexp).map_err(|error| {
            GatewayError::configuration(format!("invalid regexp '{}': {error}", config.regexp))
        })?;
        // `$\` escapes `$` to sidestep YAML interpolation.
        let replacement = config.replacement.replace("$\\", "$");
        Ok(FactoryFilter::unordered(Arc::new(RewritePathFilter {
            regex,
            replacement,
        })))
    }
}

/// Prepends a fixed prefix to the request path.
pub struct PrefixPathGatewayFilterFactory;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrefixPathConfig {
    prefix: String,
}

struct PrefixPathFilter {
    prefix: String,
}

#[async_trait]
impl GatewayFilter for PrefixPathFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        exchange.add_original_request_url();
        let prefixed = format!("{}{}", self.prefix, exchange.request.uri.path());
        exchange.set_request_path(&prefixed)?;
        chain.filter(exchange).await
    }
}

impl GatewayFilterFactory for PrefixPathGatewayFilterFactory {
    fn name(&self) -> &'static str {
        "PrefixPath"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["prefix"]
    }

    fn apply(&self, config: Value) -> Result<FactoryFilter, GatewayError> {
        let config: PrefixPathConfig = bind(self.name(), config)?;
        Ok(FactoryFilter::unordered(Arc::new(PrefixPathFilter {
            prefix: config.prefix,
        })))
    }
}

/// Appends a header to the upstream request.
pub struct AddRequestHeaderGatewayFilterFactory;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AddRequestHeaderConfig {
    name: String,
    value: String,
}

struct AddRequestHeaderFilter {
    name: HeaderName,
    value: HeaderValue,
}

#[async_trait]
impl GatewayFilter for AddRequestHeaderFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        exchange
            .request
            .headers
            .append(self.name.clone(), self.value.clone());
        chain.filter(exchange).await
    }
}

impl GatewayFilterFactory for AddRequestHeaderGatewayFilterFactory {
    fn name(&self) -> &'static str {
        "AddRequestHeader"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["name", "value"]
    }

    fn apply(&self, config: Value) -> Result<FactoryFilter, GatewayError> {
        let config: AddRequestHeaderConfig = bind(self.name(), config)?;
        let name: HeaderName = config.name.parse().map_err(|_| {
            GatewayError::configuration(format!("invalid header name '{}'", config.name))
        })?;
        let value: HeaderValue = config.value.parse().map_err(|_| {
            GatewayError::configuration(format!("invalid header value '{}'", config.value))
        })?;
        Ok(FactoryFilter::unordered(Arc::new(AddRequestHeaderFilter {
            name,
            value,
        })))
    }
}

/// Applies the distributed token bucket to the exchange.
pub struct RequestRateLimiterGatewayFilterFactory {
    limiter: Arc<dyn RateLimiter>,
    key_resolver: Arc<dyn KeyResolver>,
    deny_empty_key: bool,
    empty_key_status: StatusCode,
}

impl RequestRateLimiterGatewayFilterFactory {
    pub fn new(limiter: Arc<dyn RateLimiter>, key_resolver: Arc<dyn KeyResolver>) -> Self {
        Self {
            limiter,
            key_resolver,
            deny_empty_key: true,
            empty_key_status: StatusCode::FORBIDDEN,
        }
    }
}

// Argument values arrive as strings (the shortcut form knows nothing else),
// so the typed knobs are parsed in `apply`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestRateLimiterConfig {
    status_code: Option<String>,
    deny_empty_key: Option<String>,
    empty_key_status_code: Option<String>,
}

fn parse_status_code(raw: &str) -> Result<StatusCode, GatewayError> {
    raw.parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| GatewayError::configuration(format!("invalid status code '{raw}'")))
}

fn parse_flag(raw: &str) -> Result<bool, GatewayError> {
    raw.parse::<bool>()
        .map_err(|_| GatewayError::configuration(format!("invalid boolean '{raw}'")))
}

struct RequestRateLimiterFilter {
    limiter: Arc<dyn RateLimiter>,
    key_resolver: Arc<dyn KeyResolver>,
    status: StatusCode,
    deny_empty_key: bool,
    empty_key_status: StatusCode,
}

#[async_trait]
impl GatewayFilter for RequestRateLimiterFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        let key = self
            .key_resolver
            .resolve(exchange)
            .await?
            .unwrap_or_default();
        if key.is_empty() {
            if self.deny_empty_key {
                // Status first, then terminate without delegating.
                exchange.response.status = self.empty_key_status;
                return Ok(());
            }
            return chain.filter(exchange).await;
        }

        let route_id = exchange
            .route
            .as_ref()
            .map(|route| route.id.clone())
            .unwrap_or_default();
        let decision = self.limiter.is_allowed(&route_id, &key).await;
        for (name, value) in decision.headers {
            exchange.response.headers.insert(name, value);
        }
        if decision.allowed {
            return chain.filter(exchange).await;
        }
        tracing::debug!(route = %route_id, key = %key, "request rate limited");
        exchange.response.status = self.status;
        Ok(())
    }
}

impl GatewayFilterFactory for RequestRateLimiterGatewayFilterFactory {
    fn name(&self) -> &'static str {
        "RequestRateLimiter"
    }

    fn apply(&self, config: Value) -> Result<FactoryFilter, GatewayError> {
        let config: RequestRateLimiterConfig = bind(self.name(), config)?;
        let status = match &config.status_code {
            Some(raw) => parse_status_code(raw)?,
            None => StatusCode::TOO_MANY_REQUESTS,
        };
        let empty_key_status = match &config.empty_key_status_code {
            Some(raw) => parse_status_code(raw)?,
            None => self.empty_key_status,
        };
        let deny_empty_key = match &config.deny_empty_key {
            Some(raw) => parse_flag(raw)?,
            None => self.deny_empty_key,
        };
        Ok(FactoryFilter::unordered(Arc::new(
            RequestRateLimiterFilter {
                limiter: self.limiter.clone(),
                key_resolver: self.key_resolver.clone(),
                status,
                deny_empty_key,
                empty_key_status,
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    use crate::ratelimit::RateLimitResponse;

    fn exchange(uri: &str) -> Exchange {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        Exchange::new(request, None)
    }

    async fn run(filter: &FactoryFilter, exchange: &mut Exchange) -> Result<(), GatewayError> {
        let filters: [Arc<dyn GatewayFilter>; 0] = [];
        filter
            .filter
            .filter(exchange, &mut FilterChain::new(&filters))
            .await
    }

    #[tokio::test]
    async fn rewrite_path_applies_named_groups() {
        let filter = RewritePathGatewayFilterFactory
            .apply(json!({ "regexp": "/api/(?<s>.*)", "replacement": "/v2/${s}" }))
            .unwrap();
        let mut exchange = exchange("/api/users?x=1");
        run(&filter, &mut exchange).await.unwrap();
        assert_eq!(exchange.request.uri.path(), "/v2/users");
        assert_eq!(exchange.request.uri.query(), Some("x=1"));
        assert_eq!(exchange.original_request_url.len(), 1);
    }

    #[tokio::test]
    async fn rewrite_path_unescapes_dollar_backslash() {
        let filter = RewritePathGatewayFilterFactory
            .apply(json!({ "regexp": "/foo/(?<segment>.*)", "replacement": "/$\\{segment}" }))
            .unwrap();
        let mut exchange = exchange("/foo/bar");
        run(&filter, &mut exchange).await.unwrap();
        assert_eq!(exchange.request.uri.path(), "/bar");
    }

    #[tokio::test]
    async fn prefix_path_prepends() {
        let filter = PrefixPathGatewayFilterFactory
            .apply(json!({ "prefix": "/v1" }))
            .unwrap();
        let mut exchange = exchange("/users");
        run(&filter, &mut exchange).await.unwrap();
        assert_eq!(exchange.request.uri.path(), "/v1/users");
    }

    #[tokio::test]
    async fn add_request_header_appends() {
        let filter = AddRequestHeaderGatewayFilterFactory
            .apply(json!({ "name": "X-Request-Foo", "value": "Bar" }))
            .unwrap();
        let mut exchange = exchange("/");
        run(&filter, &mut exchange).await.unwrap();
        assert_eq!(exchange.request.headers.get("x-request-foo").unwrap(), "Bar");
    }

    struct FixedLimiter {
        allowed: bool,
    }

    #[async_trait]
    impl RateLimiter for FixedLimiter {
        async fn is_allowed(&self, _route_id: &str, _key: &str) -> RateLimitResponse {
            RateLimitResponse {
                allowed: self.allowed,
                tokens_left: 0,
                headers: vec![(
                    HeaderName::from_static("x-ratelimit-remaining"),
                    HeaderValue::from_static("0"),
                )],
            }
        }
    }

    struct FixedKey(Option<&'static str>);

    #[async_trait]
    impl KeyResolver for FixedKey {
        async fn resolve(&self, _exchange: &Exchange) -> Result<Option<String>, GatewayError> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn rate_limiter_factory(
        allowed: bool,
        key: Option<&'static str>,
    ) -> RequestRateLimiterGatewayFilterFactory {
        RequestRateLimiterGatewayFilterFactory::new(
            Arc::new(FixedLimiter { allowed }),
            Arc::new(FixedKey(key)),
        )
    }

    #[tokio::test]
    async fn denied_request_gets_status_and_headers() {
        let filter = rate_limiter_factory(false, Some("u1"))
            .apply(json!({}))
            .unwrap();
        let mut exchange = exchange("/");
        run(&filter, &mut exchange).await.unwrap();
        assert_eq!(exchange.response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            exchange.response.headers.get("x-ratelimit-remaining").unwrap(),
            "0"
        );
    }

    #[tokio::test]
    async fn empty_key_is_denied_with_configured_status() {
        let filter = rate_limiter_factory(true, None)
            .apply(json!({ "empty_key_status_code": "401" }))
            .unwrap();
        let mut exchange = exchange("/");
        run(&filter, &mut exchange).await.unwrap();
        assert_eq!(exchange.response.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn empty_key_passes_through_when_allowed_by_config() {
        let filter = rate_limiter_factory(false, None)
            .apply(json!({ "deny_empty_key": "false" }))
            .unwrap();
        let mut exchange = exchange("/");
        run(&filter, &mut exchange).await.unwrap();
        // The limiter is never consulted without a key.
        assert_eq!(exchange.response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn allowed_request_continues_with_headers_merged() {
        let filter = rate_limiter_factory(true, Some("u1"))
            .apply(json!({}))
            .unwrap();
        let mut exchange = exchange("/");
        run(&filter, &mut exchange).await.unwrap();
        assert_eq!(exchange.response.status, StatusCode::OK);
        assert!(exchange
            .response
            .headers
            .contains_key("x-ratelimit-remaining"));
    }
}
