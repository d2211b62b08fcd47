//! Collaborators the orchestrator reads configuration from and reports to.
//!
//! The engine only sees these traits. In-memory implementations built from
//! [`EngineConfig`](crate::config::EngineConfig) are provided for the CLI
//! and tests, plus sinks that write to `tracing`.

use crate::config::{NamedTransform, RouteConfig};
use crate::result::ExecutionLogRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use glob::Pattern as GlobPattern;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Resolves inbound path and method to a route.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Find the route for `(path, method)`. Disabled routes are returned
    /// with `enabled: false`; `None` means no route matches.
    async fn find_route(&self, path: &str, method: &str) -> Result<Option<RouteConfig>, StoreError>;
}

/// Resolves named transforms.
#[async_trait]
pub trait TransformStore: Send + Sync {
    /// Find an enabled transform by name.
    async fn find_transform(&self, name: &str) -> Result<Option<NamedTransform>, StoreError>;
}

/// Receives one update per mapping call.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record_call(&self, metric: CallMetric) -> Result<(), SinkError>;
}

/// Receives one record per executed route.
#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    async fn record(&self, record: ExecutionLogRecord) -> Result<(), SinkError>;
}

/// Metrics update for one mapping call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallMetric {
    pub mapping_id: String,
    pub integration_id: String,
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub from_cache: bool,
}

/// Route store over a fixed route list.
pub struct InMemoryRouteStore {
    routes: Vec<(RouteConfig, Option<GlobPattern>)>,
}

impl InMemoryRouteStore {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        let routes = routes
            .into_iter()
            .map(|route| {
                let pattern = match GlobPattern::new(&route.path) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        warn!(route_id = %route.route_id, error = %e, "Route path is not a valid glob, matching exactly");
                        None
                    }
                };
                (route, pattern)
            })
            .collect();
        Self { routes }
    }

    fn matches(route: &RouteConfig, pattern: Option<&GlobPattern>, path: &str, method: &str) -> bool {
        route.method.eq_ignore_ascii_case(method)
            && (route.path == path || pattern.is_some_and(|p| p.matches(path)))
    }
}

#[async_trait]
impl RouteStore for InMemoryRouteStore {
    async fn find_route(&self, path: &str, method: &str) -> Result<Option<RouteConfig>, StoreError> {
        let mut candidates = self
            .routes
            .iter()
            .filter(|(route, pattern)| Self::matches(route, pattern.as_ref(), path, method))
            .map(|(route, _)| route);

        // Prefer an enabled route when several patterns match.
        let first = candidates.next();
        let enabled = first
            .filter(|r| r.enabled)
            .or_else(|| candidates.find(|r| r.enabled));
        Ok(enabled.or(first).cloned())
    }
}

/// Transform store over a fixed transform list.
pub struct InMemoryTransformStore {
    transforms: HashMap<String, NamedTransform>,
}

impl InMemoryTransformStore {
    pub fn new(transforms: Vec<NamedTransform>) -> Self {
        Self {
            transforms: transforms
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }
}

#[async_trait]
impl TransformStore for InMemoryTransformStore {
    async fn find_transform(&self, name: &str) -> Result<Option<NamedTransform>, StoreError> {
        Ok(self.transforms.get(name).filter(|t| t.enabled).cloned())
    }
}

/// Counters for one mapping.
#[derive(Debug, Default)]
struct MappingCounters {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    total_latency_ms: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Snapshot of one mapping's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub total_latency_ms: u64,
    pub last_error: Option<String>,
}

/// Per-mapping counters safe under concurrent updates.
#[derive(Default)]
pub struct InMemoryMetrics {
    mappings: DashMap<String, MappingCounters>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self, mapping_id: &str) -> Option<MappingStats> {
        self.mappings.get(mapping_id).map(|c| MappingStats {
            calls: c.calls.load(Ordering::Relaxed),
            successes: c.successes.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            total_latency_ms: c.total_latency_ms.load(Ordering::Relaxed),
            last_error: c.last_error.lock().clone(),
        })
    }

    /// Total calls recorded across all mappings.
    pub fn total_calls(&self) -> u64 {
        self.mappings
            .iter()
            .map(|entry| entry.calls.load(Ordering::Relaxed))
            .sum()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetrics {
    async fn record_call(&self, metric: CallMetric) -> Result<(), SinkError> {
        let counters = self.mappings.entry(metric.mapping_id.clone()).or_default();
        counters.calls.fetch_add(1, Ordering::Relaxed);
        counters
            .total_latency_ms
            .fetch_add(metric.latency_ms, Ordering::Relaxed);
        if metric.from_cache {
            counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        if metric.success {
            counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            *counters.last_error.lock() = metric.error;
        }
        Ok(())
    }
}

/// Metrics sink that only emits debug events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

#[async_trait]
impl MetricsSink for TracingMetrics {
    async fn record_call(&self, metric: CallMetric) -> Result<(), SinkError> {
        debug!(
            mapping_id = %metric.mapping_id,
            integration_id = %metric.integration_id,
            success = metric.success,
            latency_ms = metric.latency_ms,
            from_cache = metric.from_cache,
            error = ?metric.error,
            "Integration call recorded"
        );
        Ok(())
    }
}

/// Execution log kept in memory.
#[derive(Default)]
pub struct MemoryExecutionLog {
    records: Mutex<Vec<ExecutionLogRecord>>,
}

impl MemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExecutionLogRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ExecutionLogSink for MemoryExecutionLog {
    async fn record(&self, record: ExecutionLogRecord) -> Result<(), SinkError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Execution log that emits one info event per record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExecutionLog;

#[async_trait]
impl ExecutionLogSink for TracingExecutionLog {
    async fn record(&self, record: ExecutionLogRecord) -> Result<(), SinkError> {
        info!(
            route_id = %record.route_id,
            status = record.status.as_str(),
            response_status_code = record.response_status_code,
            duration_ms = record.duration_ms,
            calls = record.integration_calls.len(),
            error = ?record.error_message,
            "Route executed"
        );
        Ok(())
    }
}

/// Configuration store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record '{key}': {message}")]
    Corrupt { key: String, message: String },
}

/// Telemetry sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink write failed: {0}")]
    Write(String),
}
