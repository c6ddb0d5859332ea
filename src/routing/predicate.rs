//! Asynchronous composable route predicates.
//!
//! # Responsibilities
//! - Represent a predicate as an async function over the exchange
//! - Compose predicates with `and` / `or` / `negate`
//!
//! # Design Decisions
//! - `and` and `or` evaluate both operands concurrently and do not
//!   short-circuit; a failure on either side fails the combination
//! - Synchronous predicates are lifted with `from_sync`

use std::sync::Arc;

use futures_util::future::{try_join, BoxFuture};

use crate::error::GatewayError;
use crate::exchange::Exchange;

type PredicateFn =
    dyn for<'a> Fn(&'a Exchange) -> BoxFuture<'a, Result<bool, GatewayError>> + Send + Sync;

/// An asynchronous predicate over the exchange, producing at most one
/// verdict per evaluation.
#[derive(Clone)]
pub struct AsyncPredicate {
    inner: Arc<PredicateFn>,
}

impl AsyncPredicate {
    pub fn new<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a Exchange) -> BoxFuture<'a, Result<bool, GatewayError>>
            + Send
            + Sync
            + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Lift a synchronous predicate.
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(&Exchange) -> bool + Send + Sync + 'static,
    {
        Self::new(move |exchange| {
            let verdict = f(exchange);
            Box::pin(async move { Ok(verdict) })
        })
    }

    /// Evaluate the predicate against an exchange.
    pub async fn test(&self, exchange: &Exchange) -> Result<bool, GatewayError> {
        (self.inner)(exchange).await
    }

    /// Logical AND. Both sides are evaluated concurrently; either failure
    /// fails the result.
    pub fn and(&self, other: &AsyncPredicate) -> AsyncPredicate {
        let left = self.clone();
        let right = other.clone();
        AsyncPredicate::new(move |exchange| {
            let left = left.clone();
            let right = right.clone();
            Box::pin(async move {
                let (a, b) = try_join(left.test(exchange), right.test(exchange)).await?;
                Ok(a && b)
            })
        })
    }

    /// Logical OR. Both sides are evaluated concurrently; either failure
    /// fails the result.
    pub fn or(&self, other: &AsyncPredicate) -> AsyncPredicate {
        let left = self.clone();
        let right = other.clone();
        AsyncPredicate::new(move |exchange| {
            let left = left.clone();
            let right = right.clone();
            Box::pin(async move {
                let (a, b) = try_join(left.test(exchange), right.test(exchange)).await?;
                Ok(a || b)
            })
        })
    }

    /// Logical complement.
    pub fn negate(&self) -> AsyncPredicate {
        let inner = self.clone();
        AsyncPredicate::new(move |exchange| {
            let inner = inner.clone();
            Box::pin(async move { Ok(!inner.test(exchange).await?) })
        })
    }
}
