//! Header filtering between client and upstream.
//!
//! # Responsibilities
//! - Scrub hop-by-hop headers on both directions
//! - Let routing filters fold an ordered list of header filters over the
//!   request or response header set

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderName};

use crate::exchange::Exchange;

/// Which side of the proxied exchange a header set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// Transforms a header set before it is forwarded.
pub trait HeaderFilter: Send + Sync {
    fn filter(&self, headers: &HeaderMap, exchange: &Exchange, direction: Direction) -> HeaderMap;
}

/// Apply `filters` to `headers` as a fold, in insertion order.
pub fn filter_headers(
    filters: &[Arc<dyn HeaderFilter>],
    headers: &HeaderMap,
    exchange: &Exchange,
    direction: Direction,
) -> HeaderMap {
    filters.iter().fold(headers.clone(), |headers, filter| {
        filter.filter(&headers, exchange, direction)
    })
}

/// Strips standard hop-by-hop headers in both directions.
pub struct RemoveHopByHopHeadersFilter {
    headers: Vec<HeaderName>,
}

impl Default for RemoveHopByHopHeadersFilter {
    fn default() -> Self {
        Self {
            headers: vec![
                header::CONNECTION,
                HeaderName::from_static("keep-alive"),
                header::PROXY_AUTHENTICATE,
                header::PROXY_AUTHORIZATION,
                header::TE,
                header::TRAILER,
                header::TRANSFER_ENCODING,
                header::UPGRADE,
            ],
        }
    }
}

impl HeaderFilter for RemoveHopByHopHeadersFilter {
    fn filter(&self, headers: &HeaderMap, _exchange: &Exchange, _direction: Direction) -> HeaderMap {
        let mut filtered = headers.clone();
        for name in &self.headers {
            filtered.remove(name);
        }
        filtered
    }
}

/// Drops `Sec-WebSocket-*` request headers so the upstream handshake
/// generates its own. Appended by the WebSocket routing filter.
pub struct RemoveSecWebSocketHeadersFilter;

impl HeaderFilter for RemoveSecWebSocketHeadersFilter {
    fn filter(&self, headers: &HeaderMap, _exchange: &Exchange, direction: Direction) -> HeaderMap {
        if direction != Direction::Request {
            return headers.clone();
        }
        let mut filtered = HeaderMap::new();
        for (name, value) in headers {
            if !name.as_str().starts_with("sec-websocket-") {
                filtered.append(name.clone(), value.clone());
            }
        }
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    fn exchange() -> Exchange {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        Exchange::new(request, None)
    }

    fn headers(entries: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.append(
                HeaderName::from_static(name),
                value.parse().expect("header value"),
            );
        }
        map
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let filter = RemoveHopByHopHeadersFilter::default();
        let input = headers(&[
            ("connection", "keep-alive"),
            ("transfer-encoding", "chunked"),
            ("upgrade", "websocket"),
            ("te", "trailers"),
            ("x-custom", "kept"),
            ("accept", "*/*"),
        ]);
        let filtered = filter.filter(&input, &exchange(), Direction::Request);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.contains_key("x-custom"));
        assert!(filtered.contains_key("accept"));
    }

    #[test]
    fn sec_websocket_headers_dropped_on_request_side_only() {
        let filter = RemoveSecWebSocketHeadersFilter;
        let input = headers(&[
            ("sec-websocket-key", "abc"),
            ("sec-websocket-version", "13"),
            ("sec-websocket-protocol", "a"),
            ("x-forwarded", "kept"),
        ]);
        let request = filter.filter(&input, &exchange(), Direction::Request);
        assert_eq!(request.len(), 1);
        assert!(request.contains_key("x-forwarded"));

        let response = filter.filter(&input, &exchange(), Direction::Response);
        assert_eq!(response.len(), 4);
    }

    #[test]
    fn filters_fold_in_insertion_order() {
        struct Tag(&'static str);
        impl HeaderFilter for Tag {
            fn filter(
                &self,
                headers: &HeaderMap,
                _exchange: &Exchange,
                _direction: Direction,
            ) -> HeaderMap {
                let mut out = headers.clone();
                let trace = out
                    .get("x-trace")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                out.insert("x-trace", format!("{trace}{}", self.0).parse().unwrap());
                out
            }
        }

        let filters: Vec<Arc<dyn HeaderFilter>> = vec![Arc::new(Tag("a")), Arc::new(Tag("b"))];
        let folded = filter_headers(&filters, &HeaderMap::new(), &exchange(), Direction::Request);
        assert_eq!(folded.get("x-trace").unwrap(), "ab");
    }
}
