//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all gateway handler
//! - Wire factories, rate limiter, terminal filters and the route locator
//! - Build an Exchange per request and dispatch it through the chain
//! - Map chain failures to response statuses

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{GatewayConfig, KeyResolverConfig};
use crate::error::GatewayError;
use crate::exchange::Exchange;
use crate::factory::filters::{
    AddRequestHeaderGatewayFilterFactory, PrefixPathGatewayFilterFactory,
    RequestRateLimiterGatewayFilterFactory, RewritePathGatewayFilterFactory,
};
use crate::factory::predicates::{
    HeaderRoutePredicateFactory, HostRoutePredicateFactory, MethodRoutePredicateFactory,
    PathRoutePredicateFactory,
};
use crate::factory::{ContextExpressionEvaluator, FilterFactories, PredicateFactories};
use crate::filter::forward::FORWARD_ROUTING_FILTER_ORDER;
use crate::filter::http_routing::HTTP_ROUTING_FILTER_ORDER;
use crate::filter::url::ROUTE_TO_URL_FILTER_ORDER;
use crate::filter::websocket::WEBSOCKET_ROUTING_FILTER_ORDER;
use crate::filter::{
    ForwardRoutingFilter, HeaderFilter, HttpRoutingFilter, LocalDispatcher, LocalHandler,
    OrderedFilter, RemoveHopByHopHeadersFilter, RouteToRequestUrlFilter, WebSocketRoutingFilter,
    WriteResponseFilter,
};
use crate::lifecycle::ShutdownSignal;
use crate::ratelimit::{
    HeaderKeyResolver, InMemoryRateLimiter, KeyResolver, RateLimiter, RedisRateLimiter,
    RemoteAddrKeyResolver,
};
use crate::routing::{RouteLocator, RoutingHandler};

/// Application state injected into the gateway handler.
#[derive(Clone)]
pub struct AppState {
    handler: Arc<RoutingHandler>,
}

/// HTTP server hosting the gateway pipeline.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    locator: Arc<RouteLocator>,
    dispatcher: Arc<LocalDispatcher>,
}

impl GatewayServer {
    /// Build the full pipeline from a validated configuration. Route
    /// compilation happens here; a broken route fails startup.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let mut predicates = PredicateFactories::default();
        predicates.register(Arc::new(PathRoutePredicateFactory));
        predicates.register(Arc::new(HostRoutePredicateFactory));
        predicates.register(Arc::new(MethodRoutePredicateFactory));
        predicates.register(Arc::new(HeaderRoutePredicateFactory));

        let policy = config.rate_limiter.policy();
        let limiter: Arc<dyn RateLimiter> = match &config.rate_limiter.redis_url {
            Some(url) => Arc::new(RedisRateLimiter::new(url, policy)?),
            None => Arc::new(InMemoryRateLimiter::new(policy)),
        };
        let key_resolver: Arc<dyn KeyResolver> = match &config.rate_limiter.key_resolver {
            KeyResolverConfig::RemoteAddr => Arc::new(RemoteAddrKeyResolver),
            KeyResolverConfig::Header { name } => {
                Arc::new(HeaderKeyResolver::new(name.parse().map_err(|_| {
                    GatewayError::configuration(format!("invalid key resolver header '{name}'"))
                })?))
            }
        };

        let mut filters = FilterFactories::default();
        filters.register(Arc::new(RewritePathGatewayFilterFactory));
        filters.register(Arc::new(PrefixPathGatewayFilterFactory));
        filters.register(Arc::new(AddRequestHeaderGatewayFilterFactory));
        filters.register(Arc::new(RequestRateLimiterGatewayFilterFactory::new(
            limiter,
            key_resolver,
        )));

        let locator = Arc::new(RouteLocator::new(
            predicates,
            filters,
            config.default_filters.clone(),
            Arc::new(ContextExpressionEvaluator::default()),
        ));
        locator.refresh(&config.routes)?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|error| {
                GatewayError::configuration(format!("failed to build upstream client: {error}"))
            })?;
        let header_filters: Vec<Arc<dyn HeaderFilter>> =
            vec![Arc::new(RemoveHopByHopHeadersFilter::default())];
        let response_timeout = Duration::from_millis(config.http_client.response_timeout_ms);

        let dispatcher = Arc::new(LocalDispatcher::default());
        let global_filters = vec![
            OrderedFilter::new(ROUTE_TO_URL_FILTER_ORDER, Arc::new(RouteToRequestUrlFilter)),
            OrderedFilter::new(
                WEBSOCKET_ROUTING_FILTER_ORDER,
                Arc::new(WebSocketRoutingFilter::new(header_filters.clone())),
            ),
            OrderedFilter::new(
                HTTP_ROUTING_FILTER_ORDER,
                Arc::new(HttpRoutingFilter::new(
                    client,
                    header_filters.clone(),
                    response_timeout,
                )),
            ),
            OrderedFilter::new(
                FORWARD_ROUTING_FILTER_ORDER,
                Arc::new(ForwardRoutingFilter::new(dispatcher.clone())),
            ),
        ];
        let handler = Arc::new(RoutingHandler::new(
            locator.clone(),
            global_filters,
            Arc::new(WriteResponseFilter),
        ));

        let router = Self::build_router(AppState { handler });
        Ok(Self {
            router,
            config,
            locator,
            dispatcher,
        })
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Register an in-process handler reachable through `forward:` routes.
    pub fn register_local_handler(&self, path: impl Into<String>, handler: Arc<dyn LocalHandler>) {
        self.dispatcher.register(path, handler);
    }

    /// The route locator, for refreshes driven by external route sources.
    pub fn locator(&self) -> Arc<RouteLocator> {
        self.locator.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.locator.routes().len(),
            "gateway server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("gateway server stopped");
        Ok(())
    }
}

/// Catch-all handler: builds the exchange and runs the routing pipeline.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let mut exchange = Exchange::new(request, Some(addr));
    match state.handler.handle(&mut exchange).await {
        Ok(()) => exchange.into_response(),
        Err(error) => {
            let status = match &error {
                GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                GatewayError::BadGateway(_) | GatewayError::WebSocket(_) => {
                    StatusCode::BAD_GATEWAY
                }
                GatewayError::Configuration(_) | GatewayError::Http(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            tracing::error!(%error, status = %status, "request failed");
            status.into_response()
        }
    }
}
