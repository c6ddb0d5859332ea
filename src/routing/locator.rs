//! Route compilation and the routes snapshot.
//!
//! # Responsibilities
//! - Compile route definitions into executable routes (predicate tree +
//!   ordered filter list)
//! - Hold the active routes as a read-mostly snapshot, swapped whole on
//!   refresh
//! - Publish a refresh event for collaborators
//!
//! # Design Decisions
//! - A compile failure surfaces to the caller; the locator never silently
//!   drops a route
//! - Routes are pre-sorted by `(order, definition index)` so matching is a
//!   plain scan

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use url::Url;

use crate::error::GatewayError;
use crate::factory::{
    normalize_args, ExpressionEvaluator, FilterFactories, PredicateFactories,
};
use crate::filter::OrderedFilter;
use crate::routing::definition::{FilterDefinition, PredicateDefinition, RouteDefinition};
use crate::routing::predicate::AsyncPredicate;

/// Compiled form of a route definition.
pub struct Route {
    pub id: String,
    pub uri: Url,
    pub order: i32,
    pub predicate: AsyncPredicate,
    pub filters: Vec<OrderedFilter>,
}

/// Published after every successful routes swap.
#[derive(Debug, Clone)]
pub struct RoutesRefreshed {
    pub route_count: usize,
}

pub struct RouteLocator {
    predicates: PredicateFactories,
    filters: FilterFactories,
    default_filters: Vec<FilterDefinition>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    routes: RwLock<Arc<Vec<Arc<Route>>>>,
    events: broadcast::Sender<RoutesRefreshed>,
}

impl RouteLocator {
    pub fn new(
        predicates: PredicateFactories,
        filters: FilterFactories,
        default_filters: Vec<FilterDefinition>,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            predicates,
            filters,
            default_filters,
            evaluator,
            routes: RwLock::new(Arc::new(Vec::new())),
            events,
        }
    }

    /// Current routes snapshot, sorted by ascending order.
    pub fn routes(&self) -> Arc<Vec<Arc<Route>>> {
        self.routes.read().expect("routes lock poisoned").clone()
    }

    /// Subscribe to refresh events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoutesRefreshed> {
        self.events.subscribe()
    }

    /// Compile `definitions` and swap them in as the active routes.
    pub fn refresh(&self, definitions: &[RouteDefinition]) -> Result<(), GatewayError> {
        let mut compiled: Vec<(i32, usize, Arc<Route>)> = Vec::with_capacity(definitions.len());
        for (index, definition) in definitions.iter().enumerate() {
            let route = self.compile(definition)?;
            compiled.push((route.order, index, Arc::new(route)));
        }
        compiled.sort_by_key(|(order, index, _)| (*order, *index));
        let routes: Vec<Arc<Route>> = compiled.into_iter().map(|(_, _, route)| route).collect();
        let route_count = routes.len();

        *self.routes.write().expect("routes lock poisoned") = Arc::new(routes);
        let _ = self.events.send(RoutesRefreshed { route_count });
        tracing::info!(routes = route_count, "routes refreshed");
        Ok(())
    }

    /// Compile one definition into an executable route.
    pub fn compile(&self, definition: &RouteDefinition) -> Result<Route, GatewayError> {
        let predicate = self.combine_predicates(definition)?;
        let filters = self.load_filters(definition)?;
        Ok(Route {
            id: definition.id.clone(),
            uri: definition.uri.clone(),
            order: definition.order,
            predicate,
            filters,
        })
    }

    fn combine_predicates(
        &self,
        definition: &RouteDefinition,
    ) -> Result<AsyncPredicate, GatewayError> {
        let mut remaining = definition.predicates.iter();
        let first = remaining.next().ok_or_else(|| {
            GatewayError::configuration(format!("route '{}' has no predicates", definition.id))
        })?;
        let mut predicate = self.lookup(definition, first)?;
        for next in remaining {
            predicate = predicate.and(&self.lookup(definition, next)?);
        }
        Ok(predicate)
    }

    fn lookup(
        &self,
        definition: &RouteDefinition,
        predicate: &PredicateDefinition,
    ) -> Result<AsyncPredicate, GatewayError> {
        let factory = self.predicates.get(&predicate.name).ok_or_else(|| {
            GatewayError::configuration(format!(
                "unable to find predicate factory '{}'",
                predicate.name
            ))
        })?;
        let config = normalize_args(
            &predicate.args,
            factory.shortcut_field_order(),
            factory.shortcut_field_prefix(),
            self.evaluator.as_ref(),
        )?;
        tracing::debug!(
            route = %definition.id,
            predicate = %predicate.name,
            args = %config,
            "applying predicate"
        );
        factory.apply(config)
    }

    fn load_filters(
        &self,
        definition: &RouteDefinition,
    ) -> Result<Vec<OrderedFilter>, GatewayError> {
        let mut filters = Vec::new();
        self.append_filters("default_filters", &self.default_filters, &mut filters)?;
        self.append_filters(&definition.id, &definition.filters, &mut filters)?;
        filters.sort_by_key(|entry| entry.order);
        Ok(filters)
    }

    fn append_filters(
        &self,
        id: &str,
        definitions: &[FilterDefinition],
        out: &mut Vec<OrderedFilter>,
    ) -> Result<(), GatewayError> {
        for (index, definition) in definitions.iter().enumerate() {
            let factory = self.filters.get(&definition.name).ok_or_else(|| {
                GatewayError::configuration(format!(
                    "unable to find filter factory '{}'",
                    definition.name
                ))
            })?;
            let config = normalize_args(
                &definition.args,
                factory.shortcut_field_order(),
                factory.shortcut_field_prefix(),
                self.evaluator.as_ref(),
            )?;
            tracing::debug!(
                route = %id,
                filter = %definition.name,
                args = %config,
                "applying filter"
            );
            let produced = factory.apply(config)?;
            let order = produced.order.unwrap_or(index as i32 + 1);
            out.push(OrderedFilter::new(order, produced.filter));
        }
        Ok(())
    }
}
