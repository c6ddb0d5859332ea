//! Deferred response writeback.

use async_trait::async_trait;
use axum::body::Body;

use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::filter::{FilterChain, GatewayFilter};

/// Appended at the very end of every chain. When a terminal routing filter
/// has parked an upstream response on the exchange, the writer moves its
/// streaming body into the outbound response; otherwise the exchange is left
/// untouched.
pub struct WriteResponseFilter;

#[async_trait]
impl GatewayFilter for WriteResponseFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        chain.filter(exchange).await?;
        if let Some(client_response) = exchange.client_response.take() {
            exchange.response_body = Some(Body::from_stream(client_response.bytes_stream()));
        }
        Ok(())
    }
}
