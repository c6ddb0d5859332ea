//! Terminal in-process forwarding filter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Response, StatusCode};

use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::filter::{FilterChain, GatewayFilter};

pub const FORWARD_ROUTING_FILTER_ORDER: i32 = i32::MAX;

/// A local endpoint reachable through `forward:` routes.
#[async_trait]
pub trait LocalHandler: Send + Sync {
    async fn handle(&self, exchange: &mut Exchange) -> Result<Response<Body>, GatewayError>;
}

/// Path-keyed registry of in-process handlers.
#[derive(Default)]
pub struct LocalDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn LocalHandler>>>,
}

impl LocalDispatcher {
    pub fn register(&self, path: impl Into<String>, handler: Arc<dyn LocalHandler>) {
        self.handlers
            .write()
            .expect("local dispatcher lock poisoned")
            .insert(path.into(), handler);
    }

    fn get(&self, path: &str) -> Option<Arc<dyn LocalHandler>> {
        self.handlers
            .read()
            .expect("local dispatcher lock poisoned")
            .get(path)
            .cloned()
    }
}

/// Dispatches `forward:` targets to a registered local handler. No upstream
/// network traffic is produced.
pub struct ForwardRoutingFilter {
    dispatcher: Arc<LocalDispatcher>,
}

impl ForwardRoutingFilter {
    pub fn new(dispatcher: Arc<LocalDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl GatewayFilter for ForwardRoutingFilter {
    async fn filter(
        &self,
        exchange: &mut Exchange,
        chain: &mut FilterChain<'_>,
    ) -> Result<(), GatewayError> {
        let Some(url) = exchange.gateway_request_url.clone() else {
            return chain.filter(exchange).await;
        };
        if exchange.is_already_routed() || url.scheme() != "forward" {
            return chain.filter(exchange).await;
        }
        exchange.set_already_routed();

        let path = url.path().to_string();
        tracing::trace!(path = %path, "forwarding to local handler");
        match self.dispatcher.get(&path) {
            Some(handler) => {
                let response = handler.handle(exchange).await?;
                exchange.direct_response = Some(response);
            }
            None => {
                tracing::warn!(path = %path, "no local handler registered");
                exchange.response.status = StatusCode::NOT_FOUND;
            }
        }
        Ok(())
    }
}
