//! Route orchestration.
//!
//! [`RouteOrchestrator::execute_route`] resolves the route for an inbound
//! request, drives each mapping through the call pipeline (cache, request
//! transform, HTTP call, response transform) under the route's strategy and
//! returns one [`ExecutionResult`] with the full audit trail.
//!
//! Telemetry writes are best-effort: they are awaited, but a failing or
//! panicking sink only produces a warning.

mod call;
mod strategy;

pub use call::cache_key;

use crate::aggregator::ResponseAggregator;
use crate::cache::{Clock, SystemClock, TtlCache};
use crate::client::IntegrationClient;
use crate::config::{EngineConfig, RouteConfig, Settings};
use crate::context::InboundRequest;
use crate::result::{ExecutionLogRecord, ExecutionMetadata, ExecutionResult};
use crate::rule::RuleHandler;
use crate::store::{
    ExecutionLogSink, InMemoryRouteStore, InMemoryTransformStore, MetricsSink, RouteStore, SinkError,
    TracingExecutionLog, TracingMetrics, TransformStore,
};
use crate::transformer::TransformExecutor;
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Executes configured routes against their integrations.
pub struct RouteOrchestrator {
    settings: Settings,
    routes: Arc<dyn RouteStore>,
    transform_store: Arc<dyn TransformStore>,
    transforms: TransformExecutor,
    client: Arc<dyn IntegrationClient>,
    aggregator: ResponseAggregator,
    response_cache: TtlCache<String, JsonValue>,
    metrics: Arc<dyn MetricsSink>,
    execution_log: Arc<dyn ExecutionLogSink>,
    clock: Arc<dyn Clock>,
}

impl RouteOrchestrator {
    pub fn new(
        settings: Settings,
        routes: Arc<dyn RouteStore>,
        transforms: Arc<dyn TransformStore>,
        client: Arc<dyn IntegrationClient>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            transforms: TransformExecutor::new(transforms.clone(), &settings, clock.clone()),
            response_cache: Self::response_cache(&settings, clock.clone()),
            aggregator: ResponseAggregator::new().with_clock(clock.clone()),
            transform_store: transforms,
            settings,
            routes,
            client,
            metrics: Arc::new(TracingMetrics),
            execution_log: Arc::new(TracingExecutionLog),
            clock,
        }
    }

    /// Build an orchestrator over the routes and transforms of `config`.
    pub fn from_config(config: &EngineConfig, client: Arc<dyn IntegrationClient>) -> Self {
        Self::new(
            config.settings.clone(),
            Arc::new(InMemoryRouteStore::new(config.routes.clone())),
            Arc::new(InMemoryTransformStore::new(config.transforms.clone())),
            client,
        )
    }

    fn response_cache(settings: &Settings, clock: Arc<dyn Clock>) -> TtlCache<String, JsonValue> {
        TtlCache::new(
            Duration::from_secs(settings.response_cache_ttl_secs),
            settings.response_cache_max_entries,
            clock,
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_execution_log(mut self, log: Arc<dyn ExecutionLogSink>) -> Self {
        self.execution_log = log;
        self
    }

    /// Replace the clock used by both caches and aggregation timestamps.
    /// Cached entries are dropped.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let rules = self.transforms.rule_engine().clone();
        self.transforms = TransformExecutor::new(self.transform_store.clone(), &self.settings, clock.clone())
            .with_rule_engine(rules);
        self.response_cache = Self::response_cache(&self.settings, clock.clone());
        self.aggregator = self.aggregator.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    /// Replace the aggregator, e.g. to register custom aggregators.
    pub fn with_aggregator(mut self, aggregator: ResponseAggregator) -> Self {
        self.aggregator = aggregator.with_clock(self.clock.clone());
        self
    }

    /// Register a handler for `custom` transformation rules.
    pub fn with_rule_handler(mut self, name: impl Into<String>, handler: Arc<dyn RuleHandler>) -> Self {
        self.transforms.rule_engine_mut().register(name, handler);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Execute the route bound to `(path, method)`. Always returns a result.
    pub async fn execute_route(&self, path: &str, method: &str, request: InboundRequest) -> ExecutionResult {
        let started = Instant::now();

        match AssertUnwindSafe(self.run(path, method, &request, started))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(path = %path, method = %method, error = %message, "Route execution panicked");
                ExecutionResult::failure(
                    format!("Unexpected error: {}", message),
                    ExecutionMetadata {
                        duration_ms: elapsed_ms(started),
                        ..Default::default()
                    },
                )
            }
        }
    }

    async fn run(&self, path: &str, method: &str, request: &InboundRequest, started: Instant) -> ExecutionResult {
        let route = match self.routes.find_route(path, method).await {
            Ok(Some(route)) => route,
            Ok(None) => {
                debug!(path = %path, method = %method, "No route matched");
                return ExecutionResult::failure(
                    format!("No route found for {} {}", method.to_uppercase(), path),
                    ExecutionMetadata {
                        duration_ms: elapsed_ms(started),
                        ..Default::default()
                    },
                );
            }
            Err(e) => {
                error!(path = %path, method = %method, error = %e, "Route lookup failed");
                return ExecutionResult::failure(
                    format!("Unexpected error: {}", e),
                    ExecutionMetadata {
                        duration_ms: elapsed_ms(started),
                        ..Default::default()
                    },
                );
            }
        };

        if !route.enabled {
            debug!(route_id = %route.route_id, "Route is disabled");
            return ExecutionResult::failure(
                format!("Route '{}' is not enabled", route.route_id),
                route_metadata(&route, started),
            );
        }
        if route.mappings.is_empty() {
            warn!(route_id = %route.route_id, "Route has no mappings");
            return ExecutionResult::failure(
                format!("Route '{}' has no integration mappings", route.route_id),
                route_metadata(&route, started),
            );
        }

        debug!(
            route_id = %route.route_id,
            strategy = route.aggregation_strategy.as_str(),
            mappings = route.mappings.len(),
            "Executing route"
        );

        let outcome = self.run_strategy(&route, request).await;
        let mut metadata = route_metadata(&route, started);
        metadata.integration_calls = outcome.calls;
        let result = ExecutionResult::new(outcome.status, outcome.data, outcome.errors, metadata);

        info!(
            route_id = %route.route_id,
            status = result.status.as_str(),
            calls = result.calls().len(),
            duration_ms = result.metadata.duration_ms,
            "Route completed"
        );

        self.write_execution_log(&route, request, &result).await;
        result
    }

    async fn write_execution_log(&self, route: &RouteConfig, request: &InboundRequest, result: &ExecutionResult) {
        let record = ExecutionLogRecord {
            route_id: route.route_id.clone(),
            route_name: route.name.clone(),
            request: request.shape(),
            integration_calls: result.metadata.integration_calls.clone(),
            status: result.status,
            response_status_code: ExecutionLogRecord::response_status_code(result),
            duration_ms: result.metadata.duration_ms,
            error_message: result.errors.as_ref().map(|errors| errors.join("; ")),
            timestamp: self.clock.now(),
        };
        best_effort("execution_log", self.execution_log.record(record)).await;
    }
}

/// Await a telemetry write, discarding errors and panics with a warning.
pub(crate) async fn best_effort<F>(sink: &'static str, write: F)
where
    F: Future<Output = Result<(), SinkError>>,
{
    match AssertUnwindSafe(write).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(sink = sink, error = %e, "Telemetry write failed, ignoring"),
        Err(panic) => warn!(
            sink = sink,
            error = %panic_message(panic.as_ref()),
            "Telemetry sink panicked, ignoring"
        ),
    }
}

fn route_metadata(route: &RouteConfig, started: Instant) -> ExecutionMetadata {
    ExecutionMetadata {
        route_id: Some(route.route_id.clone()),
        route_name: Some(route.name.clone()),
        duration_ms: elapsed_ms(started),
        integration_calls: vec![],
        aggregation_strategy: Some(route.aggregation_strategy.as_str().to_string()),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, IntegrationRequest, IntegrationResponse};
    use crate::config::{AggregationStrategy, RouteMapping};
    use crate::result::ExecutionStatus;
    use crate::store::{MemoryExecutionLog, StoreError};
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticClient;

    #[async_trait]
    impl IntegrationClient for StaticClient {
        async fn send(&self, _request: IntegrationRequest) -> Result<IntegrationResponse, ClientError> {
            Ok(IntegrationResponse {
                status: 200,
                reason: Some("OK".into()),
                body: r#"{"ok": true}"#.into(),
            })
        }
    }

    struct PanickingClient;

    #[async_trait]
    impl IntegrationClient for PanickingClient {
        async fn send(&self, _request: IntegrationRequest) -> Result<IntegrationResponse, ClientError> {
            panic!("connector exploded");
        }
    }

    struct BrokenRouteStore;

    #[async_trait]
    impl RouteStore for BrokenRouteStore {
        async fn find_route(&self, _path: &str, _method: &str) -> Result<Option<RouteConfig>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    struct FailingLog;

    #[async_trait]
    impl ExecutionLogSink for FailingLog {
        async fn record(&self, _record: ExecutionLogRecord) -> Result<(), SinkError> {
            Err(SinkError::Write("disk full".into()))
        }
    }

    fn mapping(id: &str) -> RouteMapping {
        RouteMapping {
            mapping_id: id.to_string(),
            integration_id: format!("int-{}", id),
            integration_name: format!("Integration {}", id),
            priority: 0,
            base_url: "http://upstream".into(),
            endpoint_path: "/lookup".into(),
            endpoint_method: "GET".into(),
            request_transform: None,
            response_transform: None,
            cache_enabled: false,
            is_fallback: false,
            headers: Default::default(),
            timeout_ms: None,
        }
    }

    fn route(id: &str, enabled: bool, mappings: Vec<RouteMapping>) -> RouteConfig {
        RouteConfig {
            route_id: id.to_string(),
            name: id.to_string(),
            path: format!("/{}", id),
            method: "GET".into(),
            aggregation_strategy: AggregationStrategy::FirstSuccess,
            fail_on_any_error: false,
            enabled,
            aggregation: None,
            mappings,
        }
    }

    fn orchestrator(routes: Vec<RouteConfig>, client: Arc<dyn IntegrationClient>) -> RouteOrchestrator {
        RouteOrchestrator::new(
            Settings::default(),
            Arc::new(InMemoryRouteStore::new(routes)),
            Arc::new(InMemoryTransformStore::new(vec![])),
            client,
        )
    }

    #[tokio::test]
    async fn test_unknown_route_is_failure() {
        let log = Arc::new(MemoryExecutionLog::new());
        let orch = orchestrator(vec![], Arc::new(StaticClient)).with_execution_log(log.clone());
        let result = orch.execute_route("/missing", "get", InboundRequest::new("GET")).await;

        assert!(!result.success);
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert_eq!(result.errors, Some(vec!["No route found for GET /missing".to_string()]));
        assert!(result.calls().is_empty());
        assert!(log.records().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_route_is_failure() {
        let orch = orchestrator(vec![route("off", false, vec![mapping("m1")])], Arc::new(StaticClient));
        let result = orch.execute_route("/off", "GET", InboundRequest::new("GET")).await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert_eq!(result.errors, Some(vec!["Route 'off' is not enabled".to_string()]));
        assert!(result.calls().is_empty());
    }

    #[tokio::test]
    async fn test_route_without_mappings_is_failure() {
        let orch = orchestrator(vec![route("empty", true, vec![])], Arc::new(StaticClient));
        let result = orch.execute_route("/empty", "GET", InboundRequest::new("GET")).await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.errors.unwrap()[0].contains("no integration mappings"));
    }

    #[tokio::test]
    async fn test_store_fault_becomes_failure_result() {
        let orch = RouteOrchestrator::new(
            Settings::default(),
            Arc::new(BrokenRouteStore),
            Arc::new(InMemoryTransformStore::new(vec![])),
            Arc::new(StaticClient),
        );
        let result = orch.execute_route("/any", "GET", InboundRequest::new("GET")).await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert!(result.errors.unwrap()[0].contains("connection refused"));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let orch = orchestrator(vec![route("boom", true, vec![mapping("m1")])], Arc::new(PanickingClient));
        let result = orch.execute_route("/boom", "GET", InboundRequest::new("GET")).await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert_eq!(
            result.errors,
            Some(vec!["Unexpected error: connector exploded".to_string()])
        );
    }

    #[tokio::test]
    async fn test_execution_log_failure_does_not_fail_request() {
        let orch = orchestrator(vec![route("ok", true, vec![mapping("m1")])], Arc::new(StaticClient))
            .with_execution_log(Arc::new(FailingLog));
        let result = orch.execute_route("/ok", "GET", InboundRequest::new("GET")).await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_execution_log_record() {
        let log = Arc::new(MemoryExecutionLog::new());
        let orch = orchestrator(vec![route("ok", true, vec![mapping("m1")])], Arc::new(StaticClient))
            .with_execution_log(log.clone());
        orch.execute_route("/ok", "GET", InboundRequest::new("GET").with_query("q", "1"))
            .await;

        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].route_id, "ok");
        assert_eq!(records[0].response_status_code, 200);
        assert_eq!(records[0].integration_calls.len(), 1);
        assert_eq!(records[0].request.query_keys, vec!["q"]);
        assert!(records[0].error_message.is_none());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(boxed.as_ref()), "static text");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned text"));
        assert_eq!(panic_message(boxed.as_ref()), "owned text");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
