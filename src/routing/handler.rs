//! Route matching and chain dispatch.
//!
//! # Responsibilities
//! - Walk the routes snapshot in order and pick the first whose predicate
//!   accepts the exchange
//! - Assemble and execute the filter chain for the matched route
//! - Answer 404 when nothing matches
//!
//! # Design Decisions
//! - Predicates are evaluated sequentially; lowest order wins, definition
//!   order breaks ties
//! - A predicate evaluation failure marks the route as non-matching and is
//!   logged at debug level

use std::sync::Arc;

use axum::http::StatusCode;

use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::filter::{assemble, FilterChain, GatewayFilter, OrderedFilter};
use crate::routing::locator::RouteLocator;

pub struct RoutingHandler {
    locator: Arc<RouteLocator>,
    global_filters: Vec<OrderedFilter>,
    response_writer: Arc<dyn GatewayFilter>,
}

impl RoutingHandler {
    pub fn new(
        locator: Arc<RouteLocator>,
        global_filters: Vec<OrderedFilter>,
        response_writer: Arc<dyn GatewayFilter>,
    ) -> Self {
        Self {
            locator,
            global_filters,
            response_writer,
        }
    }

    pub async fn handle(&self, exchange: &mut Exchange) -> Result<(), GatewayError> {
        let routes = self.locator.routes();
        let mut matched = None;
        for route in routes.iter() {
            match route.predicate.test(exchange).await {
                Ok(true) => {
                    matched = Some(Arc::clone(route));
                    break;
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::debug!(route = %route.id, %error, "predicate evaluation failed");
                }
            }
        }

        let Some(route) = matched else {
            tracing::warn!(path = %exchange.request.uri.path(), "no route matched");
            exchange.response.status = StatusCode::NOT_FOUND;
            return Ok(());
        };
        tracing::debug!(route = %route.id, path = %exchange.request.uri.path(), "route matched");
        exchange.route = Some(Arc::clone(&route));

        let mut ordered = self.global_filters.clone();
        ordered.extend(route.filters.iter().cloned());
        let mut filters = assemble(ordered);
        filters.push(Arc::clone(&self.response_writer));

        FilterChain::new(&filters).filter(exchange).await
    }
}
