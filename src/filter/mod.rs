//! Gateway filter chain.
//!
//! # Data Flow
//! ```text
//! exchange
//!     → global filters ∪ route filters (stable sort by order)
//!     → terminal routing filter (http / websocket / forward)
//!     → response writer (appended last, streams the upstream body)
//! ```
//!
//! # Responsibilities
//! - Define the filter contract and the single-use chain executor
//! - Keep pre-phase work in strict ascending order and post-phase work in
//!   reverse order via completion nesting
//!
//! # Design Decisions
//! - A filter either calls `chain.filter` exactly once or terminates the
//!   request without calling it (e.g. a rate-limit rejection)
//! - Mutations of the exchange are visible to every downstream filter
//! - An error aborts the chain and surfaces to the server handler

pub mod forward;
pub mod headers;
pub mod http_routing;
pub mod url;
pub mod websocket;
pub mod write_response;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::exchange::Exchange;

pub use self::forward::{ForwardRoutingFilter, LocalDispatcher, LocalHandler};
pub use self::headers::{Direction, HeaderFilter, RemoveHopByHopHeadersFilter};
pub use self::http_routing::HttpRoutingFilter;
pub use self::url::RouteToRequestUrlFilter;
pub use self::websocket::WebSocketRoutingFilter;
pub use self::write_response::WriteResponseFilter;

/// A single stage of the request pipeline.
#[async_trait]
pub trait GatewayFilter: Send + Sync {
    /// Apply this filter and delegate to the rest of the chain.
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError>;
}

/// A filter with its position in the chain.
#[derive(Clone)]
pub struct OrderedFilter {
    pub order: i32,
    pub filter: Arc<dyn GatewayFilter>,
}

impl OrderedFilter {
    pub fn new(order: i32, filter: Arc<dyn GatewayFilter>) -> Self {
        Self { order, filter }
    }
}

/// Single-use executor over an ordered filter slice.
///
/// Each call to [`FilterChain::filter`] advances the pointer by one and
/// invokes the next filter; running past the end completes the chain.
pub struct FilterChain<'a> {
    filters: &'a [Arc<dyn GatewayFilter>],
    index: usize,
}

impl<'a> FilterChain<'a> {
    pub fn new(filters: &'a [Arc<dyn GatewayFilter>]) -> Self {
        Self { filters, index: 0 }
    }

    /// Invoke the next filter in the chain.
    pub async fn filter(&mut self, exchange: &mut Exchange) -> Result<(), GatewayError> {
        let Some(next) = self.filters.get(self.index) else {
            return Ok(());
        };
        let next = Arc::clone(next);
        self.index += 1;
        next.filter(exchange, self).await
    }
}

/// Sort filters by ascending order (stable) and strip the order wrappers.
pub fn assemble(mut ordered: Vec<OrderedFilter>) -> Vec<Arc<dyn GatewayFilter>> {
    ordered.sort_by_key(|entry| entry.order);
    ordered.into_iter().map(|entry| entry.filter).collect()
}
