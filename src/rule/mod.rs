//! Transform Rule Engine.
//!
//! Maps a source record to a new target record with an ordered list of
//! declarative [`TransformationRule`]s. Rules are independent: a rule that
//! fails is logged and either writes its configured default or leaves its
//! target out, and the remaining rules still run.

mod calc;
mod condition;
mod format;

pub use calc::{evaluate_arithmetic, CalcError};
pub use condition::check_condition;
pub use format::{apply_format, stringify};

use crate::config::{RuleKind, TransformationRule};
use crate::expression::number;
use crate::path::{get_path, set_path};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Handler for `custom` rules, registered by name.
pub trait RuleHandler: Send + Sync {
    /// Produce the target value from the source value and the whole record.
    fn apply(&self, value: &JsonValue, source: &JsonValue) -> Result<JsonValue, RuleError>;
}

impl<F> RuleHandler for F
where
    F: Fn(&JsonValue, &JsonValue) -> Result<JsonValue, RuleError> + Send + Sync,
{
    fn apply(&self, value: &JsonValue, source: &JsonValue) -> Result<JsonValue, RuleError> {
        self(value, source)
    }
}

/// Rule engine with its registry of custom handlers.
#[derive(Clone, Default)]
pub struct RuleEngine {
    handlers: HashMap<String, Arc<dyn RuleHandler>>,
}

impl RuleEngine {
    /// Create a rule engine with no custom handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `custom` rules naming `name`.
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn RuleHandler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Register a handler in place.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn RuleHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Names of registered custom handlers.
    pub fn handlers(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Apply `rules` in order, building a new record from `source`.
    pub fn apply(&self, rules: &[TransformationRule], source: &JsonValue) -> JsonValue {
        let mut target = JsonValue::Object(serde_json::Map::new());

        for rule in rules {
            let outcome = match get_path(source, &rule.source_field) {
                Some(value) => self.apply_rule(rule, value, source),
                None => {
                    trace!(rule = %rule.id, field = %rule.source_field, "Source field missing");
                    Ok(rule.config.default.clone())
                }
            };

            let value = match outcome {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    warn!(rule = %rule.id, error = %e, "Transformation rule failed");
                    match &rule.config.default {
                        Some(default) => default.clone(),
                        None => continue,
                    }
                }
            };

            if let Err(e) = set_path(&mut target, &rule.target_field, value) {
                warn!(
                    rule = %rule.id,
                    target = %rule.target_field,
                    error = %e,
                    "Failed to write rule target"
                );
            }
        }

        target
    }

    /// Apply one rule to a present source value. `Ok(None)` omits the target.
    pub fn apply_rule(
        &self,
        rule: &TransformationRule,
        value: &JsonValue,
        source: &JsonValue,
    ) -> Result<Option<JsonValue>, RuleError> {
        let config = &rule.config;

        match rule.transform_type {
            RuleKind::Direct => Ok(Some(value.clone())),

            RuleKind::Format => match &config.format {
                Some(format) => apply_format(format, value).map(Some),
                None => Ok(Some(value.clone())),
            },

            RuleKind::Lookup => {
                let key = stringify(value);
                let found = config.lookup.as_ref().and_then(|table| table.get(&key));
                Ok(Some(found.cloned().unwrap_or_else(|| value.clone())))
            }

            RuleKind::Calculate => {
                let Some(expression) = &config.expression else {
                    return Ok(Some(value.clone()));
                };
                let substituted = calc::substitute(expression, value, source);
                if !calc::is_whitelisted(&substituted) {
                    debug!(
                        rule = %rule.id,
                        expression = %substituted,
                        "Calculation rejected by whitelist, passing value through"
                    );
                    return Ok(Some(value.clone()));
                }
                Ok(Some(number(evaluate_arithmetic(&substituted)?)))
            }

            RuleKind::Conditional => match &config.condition {
                Some(condition) if !check_condition(source, condition) => Ok(None),
                _ => Ok(Some(value.clone())),
            },

            RuleKind::Custom => {
                let handler = config
                    .handler
                    .as_deref()
                    .and_then(|name| self.handlers.get(name));
                match handler {
                    Some(handler) => handler.apply(value, source).map(Some),
                    None => {
                        warn!(
                            rule = %rule.id,
                            handler = ?config.handler,
                            "No handler registered for custom rule, copying value"
                        );
                        Ok(Some(value.clone()))
                    }
                }
            }
        }
    }
}

/// Rule evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Cannot convert '{0}' to a number")]
    InvalidNumber(String),

    #[error("Calculation failed: {0}")]
    Calc(#[from] CalcError),

    #[error("Custom handler failed: {0}")]
    Handler(String),
}
