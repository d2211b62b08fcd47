//! Route-binding and aggregation engine for external integrations.
//!
//! An inbound request is resolved to a route, and the route's integration
//! mappings are executed under one of its strategies:
//!
//! - `first_success`: mappings in order, stop at the first success
//! - `priority_order`: primaries by priority, then fallbacks
//! - `merge_results` / `all_parallel`: all mappings concurrently, merged
//! - `chain`: each mapping's output becomes the next mapping's body
//!
//! Request and response payloads are reshaped by transforms: inline
//! expressions in a small sandboxed language, or named transforms with
//! field-level rules. Every call lands in the audit trail of the returned
//! [`ExecutionResult`].
//!
//! ## Configuration Example
//!
//! ```yaml
//! routes:
//!   - route_id: "person-lookup"
//!     name: "Person lookup"
//!     path: "/api/people"
//!     method: GET
//!     aggregation_strategy: priority_order
//!     mappings:
//!       - mapping_id: "registry"
//!         integration_id: "national-registry"
//!         integration_name: "National Registry"
//!         base_url: "https://registry.example.org"
//!         endpoint_path: "/v1/persons"
//!         response_transform: "$.items.map(p => { id: p.personId, name: p.fullName })"
//! ```

pub mod aggregator;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod expression;
pub mod orchestrator;
pub mod path;
pub mod result;
pub mod rule;
pub mod store;
pub mod transformer;

pub use aggregator::{AggregatedResponse, ResponseAggregator, SourceResponse};
pub use client::{HttpIntegrationClient, IntegrationClient};
pub use config::EngineConfig;
pub use context::InboundRequest;
pub use expression::{Evaluator, ExpressionError};
pub use orchestrator::RouteOrchestrator;
pub use result::{ExecutionResult, ExecutionStatus, IntegrationCallResult};
pub use rule::{RuleEngine, RuleError};
pub use transformer::TransformExecutor;
