//! Terminal WebSocket routing filter.
//!
//! # Responsibilities
//! - Capture `ws`/`wss` targets plus HTTP requests carrying a WebSocket
//!   upgrade, rewriting the scheme for the latter
//! - Open the upstream socket with filtered headers and the client's
//!   sub-protocol offers, answer the client handshake with the protocol the
//!   upstream accepted
//! - Pump frames in both directions until either side closes
//!
//! # Design Decisions
//! - The upstream connection is established before the client handshake
//!   completes, so a connect failure still maps to a 502
//! - Binary payloads cross the proxy as reference-counted buffers, no copy

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, StatusCode};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message as TgMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::filter::headers::{
    filter_headers, Direction, HeaderFilter, RemoveSecWebSocketHeadersFilter,
};
use crate::filter::{FilterChain, GatewayFilter};

/// Before the HTTP routing filter, since this captures certain HTTP requests.
pub const WEBSOCKET_ROUTING_FILTER_ORDER: i32 = i32::MAX - 1;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WebSocketRoutingFilter {
    header_filters: Vec<Arc<dyn HeaderFilter>>,
}

impl WebSocketRoutingFilter {
    pub fn new(mut header_filters: Vec<Arc<dyn HeaderFilter>>) -> Self {
        header_filters.push(Arc::new(RemoveSecWebSocketHeadersFilter));
        Self { header_filters }
    }

    /// Rewrite `http`/`https` targets to `ws`/`wss` when the inbound request
    /// asks for a WebSocket upgrade.
    fn change_scheme_if_upgrade(&self, exchange: &mut Exchange) {
        let Some(url) = exchange.gateway_request_url.clone() else {
            return;
        };
        let upgrade = exchange
            .request
            .headers
            .get(header::UPGRADE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let scheme = url.scheme().to_string();
        if upgrade.eq_ignore_ascii_case("websocket") && (scheme == "http" || scheme == "https") {
            let mut rewritten = url;
            if rewritten.set_scheme(convert_http_to_ws(&scheme)).is_ok() {
                tracing::trace!(url = %rewritten, "rewrote upgrade request scheme");
                exchange.gateway_request_url = Some(rewritten);
            }
        }
    }
}

fn convert_http_to_ws(scheme: &str) -> &str {
    match scheme {
        "http" => "ws",
        "https" => "wss",
        other => other,
    }
}

#[async_trait]
impl GatewayFilter for WebSocketRoutingFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        self.change_scheme_if_upgrade(exchange);
        let Some(url) = exchange.gateway_request_url.clone() else {
            return chain.filter(exchange).await;
        };
        let scheme = url.scheme().to_string();
        if exchange.is_already_routed() || (scheme != "ws" && scheme != "wss") {
            return chain.filter(exchange).await;
        }
        exchange.set_already_routed();

        let protocols: Vec<String> = exchange
            .request
            .headers
            .get_all(header::SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|protocol| protocol.trim().to_string())
            .filter(|protocol| !protocol.is_empty())
            .collect();

        let mut filtered = filter_headers(
            &self.header_filters,
            &exchange.request.headers,
            exchange,
            Direction::Request,
        );
        filtered.remove(header::HOST);

        let upgrade = match WebSocketUpgrade::from_request_parts(&mut exchange.request, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                tracing::warn!(url = %url, %rejection, "invalid websocket upgrade request");
                exchange.response.status = StatusCode::BAD_REQUEST;
                return Ok(());
            }
        };

        let mut upstream_request = url
            .as_str()
            .into_client_request()
            .map_err(|error| GatewayError::WebSocket(error.to_string()))?;
        for (name, value) in filtered.iter() {
            upstream_request.headers_mut().append(name, value.clone());
        }
        if !protocols.is_empty() {
            upstream_request.headers_mut().insert(
                header::SEC_WEBSOCKET_PROTOCOL,
                protocols
                    .join(", ")
                    .parse()
                    .map_err(axum::http::Error::from)?,
            );
        }

        let (upstream, handshake) = connect_async(upstream_request).await.map_err(|error| {
            tracing::error!(url = %url, %error, "failed to connect upstream websocket");
            GatewayError::WebSocket(error.to_string())
        })?;
        let accepted_protocol = handshake
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut upgrade = upgrade;
        if let Some(protocol) = accepted_protocol {
            upgrade = upgrade.protocols([protocol]);
        }
        let response = upgrade.on_upgrade(move |client| proxy_websocket(client, upstream, url));
        exchange.direct_response = Some(response);
        Ok(())
    }
}

/// Forward frames in both directions until either side closes.
async fn proxy_websocket(client: WebSocket, upstream: UpstreamSocket, url: Url) {
    let (mut upstream_sink, mut upstream_stream) = upstream.split();
    let (mut client_sink, mut client_stream) = client.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_stream.next().await {
            let forwarded = match message {
                Message::Text(text) => TgMessage::Text(text.to_string().into()),
                Message::Binary(payload) => TgMessage::Binary(payload),
                Message::Ping(payload) => TgMessage::Ping(payload),
                Message::Pong(payload) => TgMessage::Pong(payload),
                Message::Close(frame) => TgMessage::Close(frame.map(close_frame_to_upstream)),
            };
            if let Err(error) = upstream_sink.send(forwarded).await {
                tracing::warn!(%error, "error forwarding frame to upstream");
                break;
            }
        }
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_stream.next().await {
            let forwarded = match message {
                TgMessage::Text(text) => Message::Text(text.to_string().into()),
                TgMessage::Binary(payload) => Message::Binary(payload),
                TgMessage::Ping(payload) => Message::Ping(payload),
                TgMessage::Pong(payload) => Message::Pong(payload),
                TgMessage::Close(frame) => Message::Close(frame.map(close_frame_to_client)),
                _ => continue,
            };
            if let Err(error) = client_sink.send(forwarded).await {
                tracing::warn!(%error, "error forwarding frame to client");
                break;
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => {},
        _ = upstream_to_client => {},
    }
    tracing::debug!(url = %url, "websocket session closed");
}

fn close_frame_to_upstream(frame: CloseFrame) -> tungstenite::protocol::CloseFrame {
    tungstenite::protocol::CloseFrame {
        code: frame.code.into(),
        reason: frame.reason.to_string().into(),
    }
}

fn close_frame_to_client(frame: tungstenite::protocol::CloseFrame) -> CloseFrame {
    CloseFrame {
        code: frame.code.into(),
        reason: frame.reason.to_string().into(),
    }
}
