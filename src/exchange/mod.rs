//! Per-request exchange context.
//!
//! # Responsibilities
//! - Carry the inbound request (head + body) through the filter chain
//! - Accumulate the outbound response head until deferred writeback
//! - Expose the well-known gateway attributes as typed fields
//!
//! # Design Decisions
//! - Attributes are explicit struct fields, not a reflective map; out-of-core
//!   filters get a string-keyed extension map instead
//! - The request body is taken at most once, by the terminal routing filter
//! - Nothing is written to the wire until the whole chain has completed, so
//!   every filter may still mutate status and headers in its post phase

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Uri};
use url::Url;

use crate::error::GatewayError;
use crate::routing::Route;

/// Mutable response head, committed only after the chain completes.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

/// Per-request context shared by every filter along a single chain.
pub struct Exchange {
    /// Inbound request head. Path-rewriting filters mutate the URI in place.
    pub request: Parts,
    /// Inbound request body; taken once by the terminal routing filter.
    pub body: Option<Body>,
    /// Peer address of the connected client.
    pub client_addr: Option<SocketAddr>,

    /// Outbound response head under construction.
    pub response: ResponseHead,
    /// Streaming response body, set by the response writer.
    pub response_body: Option<Body>,
    /// A complete response that bypasses deferred writeback (WebSocket
    /// handshake, in-process forward output).
    pub direct_response: Option<Response<Body>>,
    /// Upstream response handle awaiting deferred writeback.
    pub client_response: Option<reqwest::Response>,

    /// Current target URI; terminal routing filters read this.
    pub gateway_request_url: Option<Url>,
    /// Prior request URIs in rewrite order. Append-only.
    pub original_request_url: Vec<Uri>,
    /// The matched route.
    pub route: Option<Arc<Route>>,
    /// Forward the inbound `Host` header to the upstream when set.
    pub preserve_host_header: bool,
    /// Upstream `Content-Type` captured before response filters run.
    pub original_response_content_type: Option<HeaderValue>,
    /// Set by the first terminal routing filter that accepts the exchange.
    already_routed: bool,

    /// String-keyed attributes for out-of-core filters.
    pub extensions: HashMap<String, String>,
}

impl Exchange {
    pub fn new(request: Request<Body>, client_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            request: parts,
            body: Some(body),
            client_addr,
            response: ResponseHead::default(),
            response_body: None,
            direct_response: None,
            client_response: None,
            gateway_request_url: None,
            original_request_url: Vec::new(),
            route: None,
            preserve_host_header: false,
            original_response_content_type: None,
            already_routed: false,
            extensions: HashMap::new(),
        }
    }

    /// Whether a terminal routing filter has already claimed this exchange.
    pub fn is_already_routed(&self) -> bool {
        self.already_routed
    }

    /// Claim the exchange. Every terminal routing filter seen afterwards
    /// must pass the exchange through untouched.
    pub fn set_already_routed(&mut self) {
        self.already_routed = true;
    }

    /// Record the current request URI before a path-rewriting filter
    /// replaces it.
    pub fn add_original_request_url(&mut self) {
        self.original_request_url.push(self.request.uri.clone());
    }

    /// Replace the request path, keeping the query string.
    pub fn set_request_path(&mut self, path: &str) -> Result<(), GatewayError> {
        let mut parts = self.request.uri.clone().into_parts();
        let path_and_query = match self.request.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        };
        parts.path_and_query = Some(
            path_and_query
                .parse::<PathAndQuery>()
                .map_err(axum::http::Error::from)?,
        );
        self.request.uri = Uri::from_parts(parts).map_err(axum::http::Error::from)?;
        Ok(())
    }

    /// Assemble the final client response.
    pub fn into_response(self) -> Response<Body> {
        if let Some(response) = self.direct_response {
            return response;
        }
        let mut response = Response::new(self.response_body.unwrap_or_else(Body::empty));
        *response.status_mut() = self.response.status;
        *response.headers_mut() = self.response.headers;
        response
    }
}
