//! Route model and matching engine.
//!
//! # Data Flow
//! ```text
//! configuration (YAML / text shortcut form)
//!     → definition.rs (RouteDefinition, PredicateDefinition, FilterDefinition)
//!     → locator.rs (factories + normalization → compiled Route snapshot)
//!     → handler.rs (per-request matching, chain assembly and dispatch)
//! ```
//!
//! # Design Decisions
//! - Compiled routes are immutable; refreshes swap the whole snapshot
//! - Predicates compose into a single conjunction per route
//! - First match wins (ordered by route order, then definition order)

pub mod definition;
pub mod handler;
pub mod locator;
pub mod predicate;

pub use definition::{FilterDefinition, PredicateDefinition, RouteDefinition};
pub use handler::RoutingHandler;
pub use locator::{Route, RouteLocator, RoutesRefreshed};
pub use predicate::AsyncPredicate;
