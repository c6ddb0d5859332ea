//! Predicate and filter factories.
//!
//! # Data Flow
//! ```text
//! PredicateDefinition / FilterDefinition
//!     → registry lookup by name
//!     → argument normalization (positional keys → declared field names,
//!       #{...} expression evaluation)
//!     → serde binding onto the factory's typed config
//!     → AsyncPredicate / GatewayFilter
//! ```
//!
//! # Design Decisions
//! - Registries are built at boot and frozen; no dynamic loading
//! - Factories declare their short name explicitly instead of deriving it
//!   from a type name
//! - Config binding is plain serde with unknown fields rejected

pub mod expression;
pub mod filters;
pub mod predicates;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::GatewayError;
use crate::filter::GatewayFilter;
use crate::routing::definition::generated_key_index;
use crate::routing::AsyncPredicate;

pub use expression::{ContextExpressionEvaluator, ExpressionEvaluator};

/// Produces an [`AsyncPredicate`] from a bound config.
pub trait RoutePredicateFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Field names positional shortcut arguments bind to, in order.
    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &[]
    }

    /// Prefix prepended to field names during shortcut binding.
    fn shortcut_field_prefix(&self) -> &'static str {
        ""
    }

    fn apply(&self, config: Value) -> Result<AsyncPredicate, GatewayError>;
}

/// A filter produced by a factory, with the order it declared (if any).
/// Filters without a declared order are positioned by the locator.
pub struct FactoryFilter {
    pub filter: Arc<dyn GatewayFilter>,
    pub order: Option<i32>,
}

impl FactoryFilter {
    pub fn unordered(filter: Arc<dyn GatewayFilter>) -> Self {
        Self {
            filter,
            order: None,
        }
    }
}

/// Produces a [`GatewayFilter`] from a bound config.
pub trait GatewayFilterFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn shortcut_field_order(&self) -> &'static [&'static str] {
        &[]
    }

    fn shortcut_field_prefix(&self) -> &'static str {
        ""
    }

    fn apply(&self, config: Value) -> Result<FactoryFilter, GatewayError>;
}

/// Name-keyed predicate factory registry.
#[derive(Default)]
pub struct PredicateFactories {
    factories: HashMap<String, Arc<dyn RoutePredicateFactory>>,
}

impl PredicateFactories {
    pub fn register(&mut self, factory: Arc<dyn RoutePredicateFactory>) {
        let name = factory.name().to_string();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::warn!(name = %name, "predicate factory overwritten");
        } else {
            tracing::info!(name = %name, "loaded predicate factory");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RoutePredicateFactory>> {
        self.factories.get(name).cloned()
    }
}

/// Name-keyed filter factory registry.
#[derive(Default)]
pub struct FilterFactories {
    factories: HashMap<String, Arc<dyn GatewayFilterFactory>>,
}

impl FilterFactories {
    pub fn register(&mut self, factory: Arc<dyn GatewayFilterFactory>) {
        let name = factory.name().to_string();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::warn!(name = %name, "filter factory overwritten");
        } else {
            tracing::info!(name = %name, "loaded filter factory");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GatewayFilterFactory>> {
        self.factories.get(name).cloned()
    }
}

/// Turn definition arguments into a JSON object a factory config can be
/// deserialized from.
///
/// When the map holds only `_genkey_i` keys they are rewritten to
/// `prefix + field_order[i]`; values wrapped in `#{...}` are evaluated
/// through the expression evaluator, everything else is kept verbatim.
pub fn normalize_args(
    args: &[(String, String)],
    field_order: &[&str],
    prefix: &str,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<Value, GatewayError> {
    let all_positional = !args.is_empty()
        && args
            .iter()
            .all(|(key, _)| generated_key_index(key).is_some());

    let mut object = Map::new();
    for (key, value) in args {
        let bound_key = if all_positional {
            let index = generated_key_index(key).expect("checked above");
            let field = field_order.get(index).ok_or_else(|| {
                GatewayError::configuration(format!(
                    "argument {key} has no declared shortcut field (only {} fields)",
                    field_order.len()
                ))
            })?;
            format!("{prefix}{field}")
        } else {
            key.clone()
        };
        let bound_value = if value.starts_with("#{") && value.ends_with('}') {
            evaluator.evaluate(&value[2..value.len() - 1])?
        } else {
            value.clone()
        };
        object.insert(bound_key, Value::String(bound_value));
    }
    Ok(Value::Object(object))
}
