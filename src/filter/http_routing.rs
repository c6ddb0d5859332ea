//! Terminal HTTP(S) routing filter.
//!
//! # Responsibilities
//! - Forward the exchange to the target URL over HTTP or HTTPS
//! - Stream the request body upstream and keep the response body deferred
//! - Pass upstream 4xx/5xx statuses through untouched
//!
//! # Design Decisions
//! - Response headers and status are captured on the exchange before the
//!   remaining filters run; bytes are only committed by the response writer
//! - The response timeout covers the wait for upstream response headers

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header;
use tokio::time::timeout;

use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::filter::headers::{filter_headers, Direction, HeaderFilter};
use crate::filter::{FilterChain, GatewayFilter};

/// Terminal filters run last; the WebSocket filter runs just before this one
/// to capture upgrade requests.
pub const HTTP_ROUTING_FILTER_ORDER: i32 = i32::MAX;

pub struct HttpRoutingFilter {
    client: reqwest::Client,
    header_filters: Vec<Arc<dyn HeaderFilter>>,
    response_timeout: Duration,
}

impl HttpRoutingFilter {
    pub fn new(
        client: reqwest::Client,
        header_filters: Vec<Arc<dyn HeaderFilter>>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            client,
            header_filters,
            response_timeout,
        }
    }
}

#[async_trait]
impl GatewayFilter for HttpRoutingFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        let Some(url) = exchange.gateway_request_url.clone() else {
            return chain.filter(exchange).await;
        };
        let scheme = url.scheme().to_string();
        if exchange.is_already_routed() || (scheme != "http" && scheme != "https") {
            return chain.filter(exchange).await;
        }
        exchange.set_already_routed();

        let method = exchange.request.method.clone();
        let mut filtered = filter_headers(
            &self.header_filters,
            &exchange.request.headers,
            exchange,
            Direction::Request,
        );
        // Framing is re-derived from the streamed body.
        filtered.remove(header::CONTENT_LENGTH);
        filtered.remove(header::HOST);
        if exchange.preserve_host_header {
            if let Some(host) = exchange.request.headers.get(header::HOST) {
                filtered.insert(header::HOST, host.clone());
            }
        }

        let body = exchange.body.take().unwrap_or_else(Body::empty);
        let request = self
            .client
            .request(method, url.clone())
            .headers(filtered)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()));

        tracing::debug!(url = %url, "forwarding to upstream");
        let response = match timeout(self.response_timeout, request.send()).await {
            Err(_) => return Err(GatewayError::Timeout(self.response_timeout)),
            Ok(Err(error)) => return Err(GatewayError::BadGateway(error)),
            Ok(Ok(response)) => response,
        };

        // Status first, so response header filters observe it.
        exchange.response.status = response.status();
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            exchange.original_response_content_type = Some(content_type.clone());
        }
        let filtered = filter_headers(
            &self.header_filters,
            response.headers(),
            exchange,
            Direction::Response,
        );
        exchange.response.headers.extend(filtered);
        exchange.client_response = Some(response);

        chain.filter(exchange).await
    }
}
