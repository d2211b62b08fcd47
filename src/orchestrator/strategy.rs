//! Aggregation strategies.

use super::RouteOrchestrator;
use crate::aggregator::{combine_sources, SourceResponse};
use crate::config::{AggregationStrategy, RouteConfig, RouteMapping};
use crate::context::InboundRequest;
use crate::result::{ExecutionStatus, IntegrationCallResult};
use futures::future::join_all;
use serde_json::Value as JsonValue;
use tracing::debug;

/// What a strategy hands back to the orchestrator.
pub(super) struct StrategyOutcome {
    pub status: ExecutionStatus,
    pub data: JsonValue,
    pub errors: Vec<String>,
    pub calls: Vec<IntegrationCallResult>,
}

impl StrategyOutcome {
    fn new() -> Self {
        Self {
            status: ExecutionStatus::Failure,
            data: JsonValue::Null,
            errors: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Record a call; returns its data when it succeeded.
    fn push(&mut self, call: IntegrationCallResult) -> Option<JsonValue> {
        let data = if call.is_success() {
            Some(call.data.clone().unwrap_or(JsonValue::Null))
        } else {
            self.errors.extend(call.error_text());
            None
        };
        self.calls.push(call);
        data
    }
}

/// Primary mappings, then fallbacks, each stable-sorted by priority.
pub(crate) fn priority_plan(mappings: &[RouteMapping]) -> Vec<&RouteMapping> {
    let (mut primary, mut fallback): (Vec<&RouteMapping>, Vec<&RouteMapping>) =
        mappings.iter().partition(|m| !m.is_fallback);
    primary.sort_by_key(|m| m.priority);
    fallback.sort_by_key(|m| m.priority);
    primary.extend(fallback);
    primary
}

impl RouteOrchestrator {
    pub(super) async fn run_strategy(&self, route: &RouteConfig, request: &InboundRequest) -> StrategyOutcome {
        match route.aggregation_strategy {
            AggregationStrategy::FirstSuccess => {
                self.sequential(route.mappings.iter(), request, ExecutionStatus::Success)
                    .await
            }
            AggregationStrategy::PriorityOrder => {
                self.sequential(priority_plan(&route.mappings).into_iter(), request, ExecutionStatus::Partial)
                    .await
            }
            AggregationStrategy::MergeResults | AggregationStrategy::AllParallel => {
                self.parallel(route, request).await
            }
            AggregationStrategy::Chain => self.chain(route, request).await,
        }
    }

    /// Try mappings in order until one succeeds. `after_failures` is the
    /// status reported when earlier mappings failed before the success.
    async fn sequential<'a>(
        &self,
        mappings: impl Iterator<Item = &'a RouteMapping>,
        request: &InboundRequest,
        after_failures: ExecutionStatus,
    ) -> StrategyOutcome {
        let mut outcome = StrategyOutcome::new();

        for mapping in mappings {
            let call = self.call_mapping(mapping, request, request.body.as_ref()).await;
            if let Some(data) = outcome.push(call) {
                outcome.status = if outcome.errors.is_empty() {
                    ExecutionStatus::Success
                } else {
                    after_failures
                };
                outcome.data = data;
                return outcome;
            }
            debug!(mapping_id = %mapping.mapping_id, "Mapping failed, trying next");
        }

        outcome
    }

    /// Call every mapping concurrently and wait for all of them.
    async fn parallel(&self, route: &RouteConfig, request: &InboundRequest) -> StrategyOutcome {
        let calls = join_all(
            route
                .mappings
                .iter()
                .map(|mapping| self.call_mapping(mapping, request, request.body.as_ref())),
        )
        .await;

        let sources: Vec<SourceResponse> = calls.iter().map(source_response).collect();
        let mut outcome = StrategyOutcome::new();
        for call in calls {
            outcome.push(call);
        }

        let succeeded = sources.iter().filter(|s| s.success).count();
        if succeeded == 0 {
            return outcome;
        }
        if route.fail_on_any_error && !outcome.errors.is_empty() {
            debug!(route_id = %route.route_id, failed = outcome.errors.len(), "Failing route on mapping error");
            return outcome;
        }

        outcome.data = match &route.aggregation {
            Some(config) => self.aggregator.aggregate(&sources, config).data,
            None => {
                let successful: Vec<SourceResponse> = sources.into_iter().filter(|s| s.success).collect();
                combine_sources(&successful)
            }
        };
        outcome.status = if outcome.errors.is_empty() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Partial
        };
        outcome
    }

    /// Feed each mapping's data to the next as its body. Stops at the first failure.
    async fn chain(&self, route: &RouteConfig, request: &InboundRequest) -> StrategyOutcome {
        let mut outcome = StrategyOutcome::new();
        let mut body = request.body.clone();

        for mapping in &route.mappings {
            let call = self.call_mapping(mapping, request, body.as_ref()).await;
            match outcome.push(call) {
                Some(data) => body = (!data.is_null()).then_some(data),
                None => {
                    debug!(
                        route_id = %route.route_id,
                        mapping_id = %mapping.mapping_id,
                        "Chain aborted"
                    );
                    return outcome;
                }
            }
        }

        outcome.status = ExecutionStatus::Success;
        outcome.data = body.unwrap_or(JsonValue::Null);
        outcome
    }
}

fn source_response(call: &IntegrationCallResult) -> SourceResponse {
    SourceResponse {
        integration_id: call.integration_id.clone(),
        integration_name: call.integration_name.clone(),
        success: call.is_success(),
        data: call.data.clone(),
        error: call.error.clone(),
    }
}
