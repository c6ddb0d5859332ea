//! Argument expression evaluation.
//!
//! Definition argument values of the form `#{...}` are resolved through an
//! [`ExpressionEvaluator`] before being bound onto a factory config. The
//! evaluator is a trait so tests can stub it.

use std::collections::HashMap;

use crate::error::GatewayError;

pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate the expression body (the text between `#{` and `}`).
    fn evaluate(&self, expression: &str) -> Result<String, GatewayError>;
}

/// Resolves single-quoted literals and named entries of a static context
/// map. Unknown expressions are configuration errors.
#[derive(Default)]
pub struct ContextExpressionEvaluator {
    context: HashMap<String, String>,
}

impl ContextExpressionEvaluator {
    pub fn new(context: HashMap<String, String>) -> Self {
        Self { context }
    }
}

impl ExpressionEvaluator for ContextExpressionEvaluator {
    fn evaluate(&self, expression: &str) -> Result<String, GatewayError> {
        let expression = expression.trim();
        if expression.len() >= 2 && expression.starts_with('\'') && expression.ends_with('\'') {
            return Ok(expression[1..expression.len() - 1].to_string());
        }
        self.context.get(expression).cloned().ok_or_else(|| {
            GatewayError::configuration(format!("unresolvable expression '{expression}'"))
        })
    }
}
