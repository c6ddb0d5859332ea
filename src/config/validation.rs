//! Configuration validation logic.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::ratelimit::BucketConfig;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a GatewayConfig for semantic correctness.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. Listener address must be bindable.
    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError(format!(
            "listener.bind_address '{}' is not a valid socket address",
            config.listener.bind_address
        )));
    }

    // 2. Route ids must be unique and every route needs a predicate.
    let mut seen_ids = HashSet::new();
    for route in &config.routes {
        if !seen_ids.insert(route.id.as_str()) {
            errors.push(ValidationError(format!("duplicate route id '{}'", route.id)));
        }
        if route.predicates.is_empty() {
            errors.push(ValidationError(format!(
                "route '{}' has no predicates",
                route.id
            )));
        }
    }

    // 3. Rate limit buckets must refill and hold at least one token.
    validate_bucket("rate_limiter.default", &config.rate_limiter.default, &mut errors);
    for (route_id, bucket) in &config.rate_limiter.routes {
        if !seen_ids.contains(route_id.as_str()) {
            errors.push(ValidationError(format!(
                "rate_limiter.routes references unknown route '{route_id}'"
            )));
        }
        validate_bucket(&format!("rate_limiter.routes.{route_id}"), bucket, &mut errors);
    }

    // 4. Zero timeout would fail every upstream call.
    if config.http_client.response_timeout_ms == 0 {
        errors.push(ValidationError(
            "http_client.response_timeout_ms must be > 0".to_string(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_bucket(context: &str, bucket: &BucketConfig, errors: &mut Vec<ValidationError>) {
    if bucket.replenish_rate == 0 {
        errors.push(ValidationError(format!(
            "{context}.replenish_rate must be >= 1"
        )));
    }
    if bucket.burst_capacity == 0 {
        errors.push(ValidationError(format!(
            "{context}.burst_capacity must be >= 1"
        )));
    }
}
