//! Restricted path/template expression language.
//!
//! Expressions are parsed once into an [`Expr`] tree and evaluated against a
//! JSON value. Nothing in the language can reach host code: the only
//! operations are path access, a fixed set of array methods taking a
//! single-parameter lambda, object/array templates, literals and
//! comparisons.
//!
//! ```text
//! $.results.filter(v => v.score >= 50).map(v => { "id": v.id, "name": v.person.name })
//! ```
//!
//! Known limitation: lambdas do not close over each other. Inside a nested
//! lambda only its own parameter (and `$`) is visible; naming the outer
//! parameter fails with [`ExpressionError::UnboundVariable`].

mod eval;
mod lexer;
mod parser;

pub use eval::truthy;
pub use lexer::BinaryOp;
pub use parser::{parse, Expr, Lambda, Literal, Method};
pub(crate) use parser::number;

use eval::{eval_owned, Scope};
use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Evaluate an expression without caching. `Ok(None)` means `undefined`.
pub fn evaluate(expression: &str, context: &JsonValue) -> Result<Option<JsonValue>, ExpressionError> {
    let expr = parse(expression)?;
    eval_owned(&expr, Scope::new(context))
}

/// Evaluate an already parsed expression.
pub fn evaluate_expr(expr: &Expr, context: &JsonValue) -> Result<Option<JsonValue>, ExpressionError> {
    eval_owned(expr, Scope::new(context))
}

/// Expression evaluator with a parse cache keyed by expression text.
///
/// The cache only saves parsing work; results are identical with or
/// without it.
pub struct Evaluator {
    cache: RwLock<HashMap<String, Arc<Expr>>>,
    capacity: usize,
}

impl Evaluator {
    /// Create an evaluator caching up to `capacity` parsed expressions.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Parse (or fetch from cache) an expression.
    pub fn compile(&self, expression: &str) -> Result<Arc<Expr>, ExpressionError> {
        if let Some(expr) = self.cache.read().get(expression) {
            return Ok(Arc::clone(expr));
        }

        let expr = Arc::new(parse(expression)?);
        if self.capacity > 0 {
            let mut cache = self.cache.write();
            if cache.len() >= self.capacity {
                debug!(entries = cache.len(), "Expression cache full, clearing");
                cache.clear();
            }
            cache.insert(expression.to_string(), Arc::clone(&expr));
        }
        Ok(expr)
    }

    /// Evaluate an expression against a context. `Ok(None)` means `undefined`.
    pub fn evaluate(
        &self,
        expression: &str,
        context: &JsonValue,
    ) -> Result<Option<JsonValue>, ExpressionError> {
        let expr = self.compile(expression)?;
        evaluate_expr(&expr, context)
    }

    /// Number of cached parse results.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Parse and evaluation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Empty expression")]
    Empty,

    #[error("Unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("Unterminated string starting at {pos}")]
    UnterminatedString { pos: usize },

    #[error("Invalid number '{text}' at {pos}")]
    InvalidNumber { text: String, pos: usize },

    #[error("Unexpected token {found} at {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown method '{name}' at {pos}")]
    UnknownMethod { name: String, pos: usize },

    #[error("Expected a lambda (v => ...) at {pos}")]
    ExpectedLambda { pos: usize },

    #[error("Unbound variable '{0}'")]
    UnboundVariable(String),

    #[error("Cannot call {method}() on {found}")]
    TypeMismatch {
        method: &'static str,
        found: &'static str,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Expression nests deeper than {0} levels")]
    TooDeep(usize),
}
