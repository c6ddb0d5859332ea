//! Gateway error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the routing core.
///
/// Configuration errors abort route compilation; the remaining variants flow
/// along the filter chain as failed completions and are mapped to response
/// statuses by the server handler.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid definitions, unknown factories, unbindable arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The upstream did not produce response headers within the configured
    /// response timeout.
    #[error("upstream response exceeded timeout of {0:?}")]
    Timeout(Duration),

    /// Upstream transport failure (connect refused, reset, protocol error).
    #[error("bad gateway: {0}")]
    BadGateway(#[from] reqwest::Error),

    /// Failure while proxying a WebSocket session.
    #[error("websocket upstream failure: {0}")]
    WebSocket(String),

    /// Malformed URI or header produced while rewriting the exchange.
    #[error("invalid http component: {0}")]
    Http(#[from] axum::http::Error),
}

impl GatewayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        GatewayError::Configuration(message.into())
    }
}
