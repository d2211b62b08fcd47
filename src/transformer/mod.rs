//! Named and inline transform execution.
//!
//! A mapping's transform reference is either an inline expression (text
//! starting with `$` or `{`) or the name of a transform held in the
//! [`TransformStore`]. Execution is fail-open: a missing transform, a
//! transform used in the wrong phase, or an expression that fails to parse
//! or evaluate leaves the data unchanged and logs one warning.

use crate::cache::{Clock, TtlCache};
use crate::config::{is_inline_expression, NamedTransform, Settings, TransformPhase};
use crate::expression::Evaluator;
use crate::rule::RuleEngine;
use crate::store::TransformStore;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Named transforms cached at most this many at a time.
const TRANSFORM_CACHE_ENTRIES: usize = 512;

/// Applies transforms referenced by route mappings.
pub struct TransformExecutor {
    store: Arc<dyn TransformStore>,
    cache: TtlCache<String, Option<NamedTransform>>,
    evaluator: Evaluator,
    rules: RuleEngine,
}

impl TransformExecutor {
    pub fn new(store: Arc<dyn TransformStore>, settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache: TtlCache::new(
                Duration::from_secs(settings.transform_cache_ttl_secs),
                TRANSFORM_CACHE_ENTRIES,
                clock,
            ),
            evaluator: Evaluator::new(settings.expression_cache_size),
            rules: RuleEngine::new(),
        }
    }

    /// Use a rule engine with custom handlers registered.
    pub fn with_rule_engine(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn rule_engine_mut(&mut self) -> &mut RuleEngine {
        &mut self.rules
    }

    /// Apply a transform reference in `phase`. Never fails.
    pub async fn apply(&self, reference: &str, phase: TransformPhase, data: JsonValue) -> JsonValue {
        if is_inline_expression(reference) {
            return self.apply_expression(reference, data);
        }

        let Some(transform) = self.resolve(reference).await else {
            warn!(transform = %reference, "Transform not found or disabled, passing data through");
            return data;
        };

        if !transform.transform_type.allows(phase) {
            warn!(
                transform = %transform.name,
                declared = ?transform.transform_type,
                phase = ?phase,
                "Transform not applicable to this phase, skipping"
            );
            return data;
        }

        self.apply_named(&transform, data)
    }

    /// Run a named transform: expression first, then rules on its output.
    pub fn apply_named(&self, transform: &NamedTransform, data: JsonValue) -> JsonValue {
        let shaped = match &transform.expression {
            Some(expression) => match self.evaluator.evaluate(expression, &data) {
                Ok(value) => value.unwrap_or(JsonValue::Null),
                Err(e) => {
                    warn!(
                        transform = %transform.name,
                        error = %e,
                        "Transform expression failed, passing data through"
                    );
                    return data;
                }
            },
            None => data,
        };

        if transform.rules.is_empty() {
            shaped
        } else {
            trace!(transform = %transform.name, rules = transform.rules.len(), "Applying transform rules");
            self.rules.apply(&transform.rules, &shaped)
        }
    }

    /// Evaluate an inline expression; `undefined` becomes `null`.
    pub fn apply_expression(&self, expression: &str, data: JsonValue) -> JsonValue {
        match self.evaluator.evaluate(expression, &data) {
            Ok(value) => value.unwrap_or(JsonValue::Null),
            Err(e) => {
                warn!(
                    expression = %expression,
                    error = %e,
                    "Inline transform failed, passing data through"
                );
                data
            }
        }
    }

    async fn resolve(&self, name: &str) -> Option<NamedTransform> {
        if let Some(cached) = self.cache.get(name) {
            trace!(transform = %name, "Transform cache hit");
            return cached;
        }

        match self.store.find_transform(name).await {
            Ok(found) => {
                debug!(transform = %name, found = found.is_some(), "Loaded transform");
                self.cache.insert(name.to_string(), found.clone());
                found
            }
            Err(e) => {
                warn!(transform = %name, error = %e, "Transform lookup failed");
                None
            }
        }
    }
}
