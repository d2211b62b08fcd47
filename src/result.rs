//! Per-call audit records and the route execution result.

use crate::context::RequestShape;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Outcome of one integration call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Failure,
}

/// Outcome of a whole route execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failure,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
        }
    }
}

/// Audit entry for one attempted mapping call. Built once, never modified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationCallResult {
    pub integration_id: String,
    pub integration_name: String,
    pub mapping_id: String,
    pub priority: i32,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl IntegrationCallResult {
    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }

    /// `"<integration_name> (<mapping_id>): <error>"`, for failed calls.
    pub fn error_text(&self) -> Option<String> {
        let error = self.error.as_deref()?;
        Some(format!(
            "{} ({}): {}",
            self.integration_name, self.mapping_id, error
        ))
    }
}

/// Result of executing a route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub status: ExecutionStatus,
    pub data: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    pub metadata: ExecutionMetadata,
}

/// Execution metadata, including the full audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_name: Option<String>,
    pub duration_ms: u64,
    pub integration_calls: Vec<IntegrationCallResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_strategy: Option<String>,
}

impl ExecutionResult {
    /// Build a result from a status. `errors` is omitted when empty.
    pub fn new(
        status: ExecutionStatus,
        data: JsonValue,
        errors: Vec<String>,
        metadata: ExecutionMetadata,
    ) -> Self {
        Self {
            success: status != ExecutionStatus::Failure,
            status,
            data,
            errors: (!errors.is_empty()).then_some(errors),
            metadata,
        }
    }

    /// A failure with a single error and no data.
    pub fn failure(error: impl Into<String>, metadata: ExecutionMetadata) -> Self {
        Self::new(
            ExecutionStatus::Failure,
            JsonValue::Null,
            vec![error.into()],
            metadata,
        )
    }

    pub fn calls(&self) -> &[IntegrationCallResult] {
        &self.metadata.integration_calls
    }
}

/// One record per completed route request, written to the execution log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionLogRecord {
    pub route_id: String,
    pub route_name: String,
    pub request: RequestShape,
    pub integration_calls: Vec<IntegrationCallResult>,
    pub status: ExecutionStatus,
    pub response_status_code: u16,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLogRecord {
    /// 200 on success, else the first failing call's status code, else 500.
    pub fn response_status_code(result: &ExecutionResult) -> u16 {
        if result.success {
            return 200;
        }
        result
            .calls()
            .iter()
            .find(|call| !call.is_success())
            .and_then(|call| call.status_code)
            .unwrap_or(500)
    }
}
