//! Built-in route predicate factories.
//!
//! The catalogue here covers the predicates the routing contracts need:
//! `Path`, `Host`, `Method` and `Header`. Patterns use ant-style globs
//! (`?` one character, `*` one segment, `**` any depth) compiled to regular
//! expressions at route-compilation time.

use axum::http::{header, HeaderName, Method};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::factory::RoutePredicateFactory;
use crate::routing::AsyncPredicate;

/// Compile an ant-style glob into an anchored regex.
fn pattern_to_regex(pattern: &str) -> Result<Regex, GatewayError> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("/**") {
            regex.push_str("(?:/.*)?");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("**") {
            regex.push_str(".*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('*') {
            regex.push_str("[^/]*");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('?') {
            regex.push_str("[^/]");
            rest = tail;
        } else {
            let c = rest.chars().next().expect("non-empty");
            if "\\.+()[]{}^$|".contains(c) {
                regex.push('\\');
            }
            regex.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|error| {
        GatewayError::configuration(format!("invalid pattern '{pattern}': {error}"))
    })
}

fn bind<T: for<'de> Deserialize<'de>>(name: &str, config: Value) -> Result<T, GatewayError> {
    serde_json::from_value(config)
        .map_err(|error| GatewayError::configuration(format!("invalid {name} config: {error}")))
}

/// Matches the request path against an ant-style pattern.
pub struct PathRoutePredicateFactory;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathConfig {
    pattern: String,
}

impl RoutePredicateFactory for PathRoutePredicateFactory {
    fn name(&self) -> &'static str {
        "Path"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["pattern"]
    }

    fn apply(&self, config: Value) -> Result<AsyncPredicate, GatewayError> {
        let config: PathConfig = bind(self.name(), config)?;
        let regex = pattern_to_regex(&config.pattern)?;
        Ok(AsyncPredicate::from_sync(move |exchange| {
            regex.is_match(exchange.request.uri.path())
        }))
    }
}

/// Matches the `Host` header (port ignored, case-insensitive).
pub struct HostRoutePredicateFactory;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostConfig {
    pattern: String,
}

impl RoutePredicateFactory for HostRoutePredicateFactory {
    fn name(&self) -> &'static str {
        "Host"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["pattern"]
    }

    fn apply(&self, config: Value) -> Result<AsyncPredicate, GatewayError> {
        let config: HostConfig = bind(self.name(), config)?;
        let regex = pattern_to_regex(&config.pattern.to_ascii_lowercase())?;
        Ok(AsyncPredicate::from_sync(move |exchange| {
            exchange
                .request
                .headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(|host| {
                    let host = host.split(':').next().unwrap_or(host);
                    regex.is_match(&host.to_ascii_lowercase())
                })
                .unwrap_or(false)
        }))
    }
}

/// Matches the request method.
pub struct MethodRoutePredicateFactory;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MethodConfig {
    method: String,
}

impl RoutePredicateFactory for MethodRoutePredicateFactory {
    fn name(&self) -> &'static str {
        "Method"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["method"]
    }

    fn apply(&self, config: Value) -> Result<AsyncPredicate, GatewayError> {
        let config: MethodConfig = bind(self.name(), config)?;
        let method: Method = config.method.to_ascii_uppercase().parse().map_err(|_| {
            GatewayError::configuration(format!("unknown http method '{}'", config.method))
        })?;
        Ok(AsyncPredicate::from_sync(move |exchange| {
            exchange.request.method == method
        }))
    }
}

/// Matches presence of a header, optionally constrained by a value regex.
pub struct HeaderRoutePredicateFactory;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeaderConfig {
    header: String,
    regexp: Option<String>,
}

impl RoutePredicateFactory for HeaderRoutePredicateFactory {
    fn name(&self) -> &'static str {
        "Header"
    }

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &["header", "regexp"]
    }

    fn apply(&self, config: Value) -> Result<AsyncPredicate, GatewayError> {
        let config: HeaderConfig = bind(self.name(), config)?;
        let name: HeaderName = config.header.parse().map_err(|_| {
            GatewayError::configuration(format!("invalid header name '{}'", config.header))
        })?;
        let regex = config
            .regexp
            .map(|raw| {
                Regex::new(&raw).map_err(|error| {
                    GatewayError::configuration(format!("invalid header regexp '{raw}': {error}"))
                })
            })
            .transpose()?;
        Ok(AsyncPredicate::from_sync(move |exchange| {
            exchange
                .request
                .headers
                .get_all(&name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(|value| match &regex {
                    Some(regex) => regex.is_match(value),
                    None => true,
                })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;

    use crate::exchange::Exchange;

    fn exchange(uri: &str, headers: &[(&'static str, &'static str)]) -> Exchange {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        Exchange::new(builder.body(Body::empty()).unwrap(), None)
    }

    #[tokio::test]
    async fn path_pattern_matches_nested_segments() {
        let predicate = PathRoutePredicateFactory
            .apply(json!({ "pattern": "/api/**" }))
            .unwrap();
        assert!(predicate.test(&exchange("/api/users", &[])).await.unwrap());
        assert!(predicate.test(&exchange("/api/a/b/c", &[])).await.unwrap());
        assert!(predicate.test(&exchange("/api", &[])).await.unwrap());
        assert!(!predicate.test(&exchange("/apiary", &[])).await.unwrap());
        assert!(!predicate.test(&exchange("/other", &[])).await.unwrap());
    }

    #[tokio::test]
    async fn single_star_stays_within_a_segment() {
        let predicate = PathRoutePredicateFactory
            .apply(json!({ "pattern": "/users/*/posts" }))
            .unwrap();
        assert!(predicate
            .test(&exchange("/users/42/posts", &[]))
            .await
            .unwrap());
        assert!(!predicate
            .test(&exchange("/users/42/x/posts", &[]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn host_pattern_ignores_port_and_case() {
        let predicate = HostRoutePredicateFactory
            .apply(json!({ "pattern": "**.example.org" }))
            .unwrap();
        assert!(predicate
            .test(&exchange("/", &[("host", "WWW.Example.org:8080")]))
            .await
            .unwrap());
        assert!(!predicate
            .test(&exchange("/", &[("host", "example.com")]))
            .await
            .unwrap());
        assert!(!predicate.test(&exchange("/", &[])).await.unwrap());
    }

    #[tokio::test]
    async fn method_predicate_matches_exact_method() {
        let predicate = MethodRoutePredicateFactory
            .apply(json!({ "method": "get" }))
            .unwrap();
        assert!(predicate.test(&exchange("/", &[])).await.unwrap());

        let post = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert!(!predicate.test(&Exchange::new(post, None)).await.unwrap());
    }

    #[tokio::test]
    async fn header_predicate_checks_value_regex() {
        let predicate = HeaderRoutePredicateFactory
            .apply(json!({ "header": "x-tenant", "regexp": "acme-\\d+" }))
            .unwrap();
        assert!(predicate
            .test(&exchange("/", &[("x-tenant", "acme-42")]))
            .await
            .unwrap());
        assert!(!predicate
            .test(&exchange("/", &[("x-tenant", "other")]))
            .await
            .unwrap());
        assert!(!predicate.test(&exchange("/", &[])).await.unwrap());
    }

    #[test]
    fn unknown_config_fields_are_rejected() {
        let result = PathRoutePredicateFactory.apply(json!({ "pattern": "/a", "extra": "x" }));
        assert!(result.is_err());
    }
}
