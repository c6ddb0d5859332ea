//! Target URL construction.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::filter::{FilterChain, GatewayFilter};

/// Runs after the per-route filters and before the terminal routing filters.
pub const ROUTE_TO_URL_FILTER_ORDER: i32 = 10_000;

/// Merges the matched route's scheme and authority with the current
/// (possibly rewritten) request path and query into the target URL read by
/// the terminal routing filters.
pub struct RouteToRequestUrlFilter;

#[async_trait]
impl GatewayFilter for RouteToRequestUrlFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        let Some(route) = exchange.route.clone() else {
            return chain.filter(exchange).await;
        };

        let mut merged = route.uri.clone();
        merged.set_path(exchange.request.uri.path());
        merged.set_query(exchange.request.uri.query());
        tracing::trace!(route = %route.id, url = %merged, "resolved target url");
        exchange.gateway_request_url = Some(merged);

        chain.filter(exchange).await
    }
}
