//! Response Aggregator.
//!
//! Combines payloads that were already obtained from several integrations
//! into one, recording which source contributed which fields. Sources are
//! processed in the order given; on any collision the earliest source wins.

use crate::cache::{Clock, SystemClock};
use crate::config::{AggregationConfig, AggregationType, MergeStrategy};
use crate::path::get_path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Keys searched, in order, for list payloads when combining route sources.
const LIST_KEYS: [&str; 3] = ["results", "data", "items"];

/// One integration's outcome as seen by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResponse {
    pub integration_id: String,
    pub integration_name: String,
    pub success: bool,
    pub data: Option<JsonValue>,
    pub error: Option<String>,
}

impl SourceResponse {
    pub fn success(name: impl Into<String>, data: JsonValue) -> Self {
        let name = name.into();
        Self {
            integration_id: name.clone(),
            integration_name: name,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            integration_id: name.clone(),
            integration_name: name,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    fn payload(&self) -> &JsonValue {
        self.data.as_ref().unwrap_or(&JsonValue::Null)
    }
}

/// Aggregated payload with attribution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedResponse {
    pub success: bool,
    pub data: JsonValue,
    pub sources: Vec<SourceAttribution>,
    pub metadata: AggregationMetadata,
}

/// Which fields one source contributed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAttribution {
    pub integration: String,
    pub success: bool,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationMetadata {
    pub aggregation_type: String,
    pub total_sources: usize,
    pub successful_sources: usize,
    pub timestamp: DateTime<Utc>,
}

/// Named aggregation plugged in for `type: custom`.
pub trait CustomAggregator: Send + Sync {
    fn aggregate(&self, responses: &[SourceResponse]) -> Result<JsonValue, AggregationError>;
}

impl<F> CustomAggregator for F
where
    F: Fn(&[SourceResponse]) -> Result<JsonValue, AggregationError> + Send + Sync,
{
    fn aggregate(&self, responses: &[SourceResponse]) -> Result<JsonValue, AggregationError> {
        self(responses)
    }
}

/// Response aggregator with its custom aggregator registry.
#[derive(Clone)]
pub struct ResponseAggregator {
    custom: HashMap<String, Arc<dyn CustomAggregator>>,
    clock: Arc<dyn Clock>,
}

impl Default for ResponseAggregator {
    fn default() -> Self {
        Self {
            custom: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a custom aggregator under `name`.
    pub fn with_custom(mut self, name: impl Into<String>, aggregator: Arc<dyn CustomAggregator>) -> Self {
        self.custom.insert(name.into(), aggregator);
        self
    }

    /// Combine `responses` under `config`.
    pub fn aggregate(&self, responses: &[SourceResponse], config: &AggregationConfig) -> AggregatedResponse {
        let successful: Vec<&SourceResponse> = responses.iter().filter(|r| r.success).collect();

        let (data, sources) = match config.aggregation_type {
            AggregationType::First => first(&successful),
            AggregationType::All => (
                JsonValue::Array(successful.iter().map(|r| r.payload().clone()).collect()),
                attribute_top_level(responses),
            ),
            AggregationType::Merge => merge(responses, config.merge_strategy),
            AggregationType::Custom => self.run_custom(responses, config),
        };

        let data = match (&config.deduplication_field, data) {
            (Some(field), JsonValue::Array(items)) => JsonValue::Array(deduplicate(items, field)),
            (_, data) => data,
        };

        AggregatedResponse {
            success: !successful.is_empty(),
            data,
            sources,
            metadata: AggregationMetadata {
                aggregation_type: config.aggregation_type.as_str().to_string(),
                total_sources: responses.len(),
                successful_sources: successful.len(),
                timestamp: self.clock.now(),
            },
        }
    }

    fn run_custom(&self, responses: &[SourceResponse], config: &AggregationConfig) -> (JsonValue, Vec<SourceAttribution>) {
        let name = config.custom_aggregator.as_deref();
        match name.and_then(|n| self.custom.get(n)) {
            Some(aggregator) => match aggregator.aggregate(responses) {
                Ok(data) => (data, attribute_top_level(responses)),
                Err(e) => {
                    warn!(aggregator = ?name, error = %e, "Custom aggregator failed, using shallow merge");
                    merge(responses, MergeStrategy::Shallow)
                }
            },
            None => {
                warn!(aggregator = ?name, "No custom aggregator registered, using shallow merge");
                merge(responses, MergeStrategy::Shallow)
            }
        }
    }
}

fn first(successful: &[&SourceResponse]) -> (JsonValue, Vec<SourceAttribution>) {
    match successful.first() {
        Some(source) => (
            source.payload().clone(),
            vec![SourceAttribution {
                integration: source.integration_name.clone(),
                success: true,
                fields: top_level_keys(source.payload()),
            }],
        ),
        None => (JsonValue::Null, vec![]),
    }
}

fn merge(responses: &[SourceResponse], strategy: MergeStrategy) -> (JsonValue, Vec<SourceAttribution>) {
    let mut merged = Map::new();
    let mut sources = Vec::with_capacity(responses.len());

    for response in responses {
        let mut fields = Vec::new();
        if response.success {
            match response.payload() {
                JsonValue::Object(payload) => match strategy {
                    MergeStrategy::Shallow => {
                        for (key, value) in payload {
                            if !merged.contains_key(key) {
                                merged.insert(key.clone(), value.clone());
                                fields.push(key.clone());
                            }
                        }
                    }
                    MergeStrategy::Deep => deep_merge(&mut merged, payload, "", &mut fields),
                    MergeStrategy::Array => {
                        for (key, value) in payload {
                            let slot = merged
                                .entry(key.clone())
                                .or_insert_with(|| JsonValue::Array(vec![]));
                            if let JsonValue::Array(values) = slot {
                                values.push(value.clone());
                            }
                            fields.push(key.clone());
                        }
                    }
                },
                other => debug!(
                    integration = %response.integration_name,
                    kind = kind(other),
                    "Skipping non-object payload in merge"
                ),
            }
        }
        sources.push(SourceAttribution {
            integration: response.integration_name.clone(),
            success: response.success,
            fields,
        });
    }

    (JsonValue::Object(merged), sources)
}

/// Recursive merge; existing leaves win and arrays are leaves.
fn deep_merge(target: &mut Map<String, JsonValue>, source: &Map<String, JsonValue>, prefix: &str, fields: &mut Vec<String>) {
    for (key, value) in source {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match (target.get_mut(key), value) {
            (Some(JsonValue::Object(existing)), JsonValue::Object(incoming)) => {
                deep_merge(existing, incoming, &path, fields);
            }
            (Some(_), _) => {}
            (None, value) => {
                leaf_paths(value, &path, fields);
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn leaf_paths(value: &JsonValue, path: &str, out: &mut Vec<String>) {
    match value {
        JsonValue::Object(map) if !map.is_empty() => {
            for (key, inner) in map {
                leaf_paths(inner, &format!("{}.{}", path, key), out);
            }
        }
        _ => out.push(path.to_string()),
    }
}

fn attribute_top_level(responses: &[SourceResponse]) -> Vec<SourceAttribution> {
    responses
        .iter()
        .map(|r| SourceAttribution {
            integration: r.integration_name.clone(),
            success: r.success,
            fields: if r.success { top_level_keys(r.payload()) } else { vec![] },
        })
        .collect()
}

fn top_level_keys(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Object(map) => map.keys().cloned().collect(),
        _ => vec![],
    }
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Keep the first item per value of `field`. Items without the field are kept.
pub fn deduplicate(items: Vec<JsonValue>, field: &str) -> Vec<JsonValue> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| match get_path(item, field) {
            Some(key) => seen.insert(key.to_string()),
            None => true,
        })
        .collect()
}

/// Default combination for parallel route strategies.
///
/// Lists found as bare arrays or under `results`/`data`/`items` are
/// concatenated under the first such key; payloads without a list are
/// appended as items. When no source returns a list, each payload is tagged
/// as `{source, data}` under `results`. `sources` and `count` are added.
pub fn combine_sources(successful: &[SourceResponse]) -> JsonValue {
    let lists: Vec<Option<(&str, &Vec<JsonValue>)>> = successful.iter().map(|r| find_list(r.payload())).collect();
    let sources: Vec<JsonValue> = successful
        .iter()
        .map(|r| JsonValue::String(r.integration_name.clone()))
        .collect();

    let (key, combined) = match lists.iter().flatten().next() {
        Some((key, _)) => {
            let mut combined = Vec::new();
            for (response, list) in successful.iter().zip(&lists) {
                match list {
                    Some((_, items)) => combined.extend(items.iter().cloned()),
                    None => combined.push(response.payload().clone()),
                }
            }
            (*key, combined)
        }
        None => (
            "results",
            successful
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "source": r.integration_name,
                        "data": r.payload(),
                    })
                })
                .collect(),
        ),
    };

    let count = combined.len();
    let mut out = Map::new();
    out.insert(key.to_string(), JsonValue::Array(combined));
    out.insert("sources".to_string(), JsonValue::Array(sources));
    out.insert("count".to_string(), JsonValue::from(count));
    JsonValue::Object(out)
}

fn find_list(payload: &JsonValue) -> Option<(&'static str, &Vec<JsonValue>)> {
    match payload {
        JsonValue::Array(items) => Some(("results", items)),
        JsonValue::Object(map) => LIST_KEYS
            .iter()
            .find_map(|key| match map.get(*key) {
                Some(JsonValue::Array(items)) => Some((*key, items)),
                _ => None,
            }),
        _ => None,
    }
}

/// Aggregation errors, raised by custom aggregators.
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("{0}")]
    Custom(String),
}
