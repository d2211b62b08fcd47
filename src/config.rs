//! Configuration types for the integration router.

use crate::expression::parse;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Main configuration for the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Configuration version
    pub version: String,
    /// Global settings
    pub settings: Settings,
    /// Route definitions
    pub routes: Vec<RouteConfig>,
    /// Named transforms referenced by mappings
    pub transforms: Vec<NamedTransform>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: Settings::default(),
            routes: vec![],
            transforms: vec![],
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Outbound call timeout (ms)
    pub timeout_ms: u64,
    /// How long a named transform lookup stays cached (seconds)
    pub transform_cache_ttl_secs: u64,
    /// How long a cached integration response stays valid (seconds)
    pub response_cache_ttl_secs: u64,
    /// Upper bound on cached integration responses
    pub response_cache_max_entries: usize,
    /// Upper bound on cached parsed expressions
    pub expression_cache_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            transform_cache_ttl_secs: 60,
            response_cache_ttl_secs: 300,
            response_cache_max_entries: 1024,
            expression_cache_size: 256,
        }
    }
}

/// An inbound route bound to one or more integration mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub route_id: String,
    pub name: String,
    /// Exact path or glob pattern
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub aggregation_strategy: AggregationStrategy,
    #[serde(default)]
    pub fail_on_any_error: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Standard aggregation for parallel strategies; when absent the
    /// sources are combined into a single list.
    #[serde(default)]
    pub aggregation: Option<AggregationConfig>,
    #[serde(default)]
    pub mappings: Vec<RouteMapping>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

/// How results from multiple mappings combine into one route result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    #[default]
    FirstSuccess,
    PriorityOrder,
    MergeResults,
    AllParallel,
    Chain,
}

impl AggregationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstSuccess => "first_success",
            Self::PriorityOrder => "priority_order",
            Self::MergeResults => "merge_results",
            Self::AllParallel => "all_parallel",
            Self::Chain => "chain",
        }
    }
}

/// Binding from a route to one integration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMapping {
    pub mapping_id: String,
    pub integration_id: String,
    pub integration_name: String,
    /// Lower is tried first within its partition
    #[serde(default)]
    pub priority: i32,
    pub base_url: String,
    #[serde(default)]
    pub endpoint_path: String,
    #[serde(default = "default_method")]
    pub endpoint_method: String,
    /// Transform name or inline expression applied to the outbound body
    #[serde(default)]
    pub request_transform: Option<String>,
    /// Transform name or inline expression applied to the parsed response
    #[serde(default)]
    pub response_transform: Option<String>,
    #[serde(default)]
    pub cache_enabled: bool,
    #[serde(default)]
    pub is_fallback: bool,
    /// Static headers sent with every call
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Per-mapping timeout override (ms)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// A named transform kept in the transform store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedTransform {
    pub name: String,
    #[serde(default)]
    pub transform_type: TransformPhase,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Expression evaluated against the payload
    #[serde(default)]
    pub expression: Option<String>,
    /// Field-mapping rules applied after the expression
    #[serde(default)]
    pub rules: Vec<TransformationRule>,
}

/// Which side of a call a transform applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformPhase {
    Request,
    Response,
    #[default]
    Both,
}

impl TransformPhase {
    /// Whether a transform declared for `self` may run in `phase`.
    pub fn allows(&self, phase: TransformPhase) -> bool {
        *self == TransformPhase::Both || *self == phase
    }
}

/// Declarative field mapping rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationRule {
    pub id: String,
    /// Dotted source path
    pub source_field: String,
    /// Dotted target path; numeric segments create arrays
    pub target_field: String,
    #[serde(default)]
    pub transform_type: RuleKind,
    #[serde(default)]
    pub config: RuleConfig,
}

/// Rule transform type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    #[default]
    Direct,
    Format,
    Lookup,
    Calculate,
    Conditional,
    Custom,
}

/// Type-specific rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RuleConfig {
    /// Format keyword or `{value}` template
    pub format: Option<String>,
    /// Lookup table keyed by the stringified source value
    pub lookup: Option<serde_json::Map<String, JsonValue>>,
    /// Arithmetic expression with `{value}` / `{field}` placeholders
    pub expression: Option<String>,
    /// Condition for conditional rules
    pub condition: Option<RuleCondition>,
    /// Value written when the rule fails or the source is missing
    pub default: Option<JsonValue>,
    /// Registered handler name for custom rules
    pub handler: Option<String>,
}

/// Condition resolved against the source record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Option<JsonValue>,
}

/// Condition operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    Exists,
}

/// Response aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AggregationConfig {
    #[serde(rename = "type", default)]
    pub aggregation_type: AggregationType,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    #[serde(default)]
    pub deduplication_field: Option<String>,
    #[serde(default)]
    pub custom_aggregator: Option<String>,
}

/// Aggregation type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    First,
    All,
    #[default]
    Merge,
    Custom,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::All => "all",
            Self::Merge => "merge",
            Self::Custom => "custom",
        }
    }
}

/// Merge strategy for `merge` aggregation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Shallow,
    Deep,
    Array,
}

impl EngineConfig {
    /// Load configuration from a YAML or JSON file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(serde_json::from_str(&content)?)
        }
    }

    /// Check structural invariants and that every expression parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let mut route_ids = HashSet::new();
        for route in &self.routes {
            if !route_ids.insert(route.route_id.as_str()) {
                problems.push(format!("duplicate route id '{}'", route.route_id));
            }
            if route.mappings.is_empty() {
                problems.push(format!("route '{}' has no mappings", route.route_id));
            }
            for mapping in &route.mappings {
                for reference in [&mapping.request_transform, &mapping.response_transform]
                    .into_iter()
                    .flatten()
                {
                    if is_inline_expression(reference) {
                        if let Err(e) = parse(reference) {
                            problems.push(format!(
                                "mapping '{}' inline expression: {}",
                                mapping.mapping_id, e
                            ));
                        }
                    }
                }
            }
        }

        let mut names = HashSet::new();
        for transform in &self.transforms {
            if !names.insert(transform.name.as_str()) {
                problems.push(format!("duplicate transform '{}'", transform.name));
            }
            if let Some(expr) = &transform.expression {
                if let Err(e) = parse(expr) {
                    problems.push(format!("transform '{}': {}", transform.name, e));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join("; ")))
        }
    }
}

/// Whether a transform reference is an inline expression rather than a name.
pub fn is_inline_expression(reference: &str) -> bool {
    let trimmed = reference.trim_start();
    trimmed.starts_with('$') || trimmed.starts_with('{')
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
