//! The per-mapping call pipeline.

use super::{best_effort, elapsed_ms, RouteOrchestrator};
use crate::client::IntegrationRequest;
use crate::config::{RouteMapping, TransformPhase};
use crate::context::InboundRequest;
use crate::result::{CallStatus, IntegrationCallResult};
use crate::store::CallMetric;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Inbound headers never forwarded to integrations.
const HOP_BY_HOP_HEADERS: [&str; 4] = ["host", "content-length", "connection", "transfer-encoding"];

/// Error bodies are truncated to this many characters.
const ERROR_BODY_LIMIT: usize = 200;

/// Why a mapping call failed.
struct CallFailure {
    status_code: Option<u16>,
    error: String,
}

impl CallFailure {
    fn new(status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status_code,
            error: error.into(),
        }
    }
}

/// Response cache key for a mapping and a normalized request.
///
/// Hex SHA-256 over the mapping id, the upper-cased method and the JSON text
/// of `{query, body}`. Object keys serialize sorted, so equal requests give
/// equal keys.
pub fn cache_key(mapping_id: &str, method: &str, query: &JsonValue, body: Option<&JsonValue>) -> String {
    let normalized = json!({
        "query": query,
        "body": body.unwrap_or(&JsonValue::Null),
    });

    let mut hasher = Sha256::new();
    hasher.update(mapping_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(method.to_uppercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// `base` without trailing slashes, `path` with a leading slash, then the query.
pub(crate) fn build_url(base: &str, path: &str, query: &str) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    if !path.is_empty() {
        if !path.starts_with('/') {
            url.push('/');
        }
        url.push_str(path);
    }
    if !query.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(query);
    }
    url
}

pub(crate) fn outbound_headers(
    request: &InboundRequest,
    mapping: &RouteMapping,
    has_body: bool,
) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = request
        .headers
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.clone()))
        .filter(|(name, _)| !HOP_BY_HOP_HEADERS.contains(&name.as_str()))
        .collect();

    for (name, value) in &mapping.headers {
        headers.insert(name.to_lowercase(), value.clone());
    }
    if has_body {
        headers.insert("content-type".to_string(), "application/json".to_string());
    }
    headers
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl RouteOrchestrator {
    /// Run one mapping. `body` is the outbound body before the request
    /// transform: the inbound body, or the previous step's data in a chain.
    pub(super) async fn call_mapping(
        &self,
        mapping: &RouteMapping,
        request: &InboundRequest,
        body: Option<&JsonValue>,
    ) -> IntegrationCallResult {
        let started = Instant::now();
        let key = mapping
            .cache_enabled
            .then(|| cache_key(&mapping.mapping_id, &request.method, &request.query_json(), body));

        let cached = key.as_ref().and_then(|k| self.response_cache.get(k));
        let from_cache = cached.is_some();

        let outcome = match cached {
            Some(data) => {
                trace!(mapping_id = %mapping.mapping_id, "Response cache hit");
                Ok((None, data))
            }
            None => self
                .perform(mapping, request, body)
                .await
                .map(|(status, data)| (Some(status), data)),
        };

        let result = match outcome {
            Ok((status_code, data)) => {
                if let (Some(k), false) = (key, from_cache) {
                    self.response_cache.insert(k, data.clone());
                }
                IntegrationCallResult {
                    integration_id: mapping.integration_id.clone(),
                    integration_name: mapping.integration_name.clone(),
                    mapping_id: mapping.mapping_id.clone(),
                    priority: mapping.priority,
                    status: CallStatus::Success,
                    status_code,
                    duration_ms: elapsed_ms(started),
                    error: None,
                    from_cache,
                    data: Some(data),
                }
            }
            Err(failure) => IntegrationCallResult {
                integration_id: mapping.integration_id.clone(),
                integration_name: mapping.integration_name.clone(),
                mapping_id: mapping.mapping_id.clone(),
                priority: mapping.priority,
                status: CallStatus::Failure,
                status_code: failure.status_code,
                duration_ms: elapsed_ms(started),
                error: Some(failure.error),
                from_cache: false,
                data: None,
            },
        };

        debug!(
            mapping_id = %result.mapping_id,
            integration = %result.integration_name,
            success = result.is_success(),
            status_code = ?result.status_code,
            duration_ms = result.duration_ms,
            from_cache = result.from_cache,
            error = ?result.error,
            "Integration call finished"
        );

        let metric = CallMetric {
            mapping_id: result.mapping_id.clone(),
            integration_id: result.integration_id.clone(),
            success: result.is_success(),
            latency_ms: result.duration_ms,
            error: result.error.clone(),
            from_cache: result.from_cache,
        };
        best_effort("metrics", self.metrics.record_call(metric)).await;

        result
    }

    async fn perform(
        &self,
        mapping: &RouteMapping,
        request: &InboundRequest,
        body: Option<&JsonValue>,
    ) -> Result<(u16, JsonValue), CallFailure> {
        let body = match &mapping.request_transform {
            Some(reference) => {
                let input = body.cloned().unwrap_or(JsonValue::Null);
                let transformed = self.transforms.apply(reference, TransformPhase::Request, input).await;
                (!transformed.is_null()).then_some(transformed)
            }
            None => body.filter(|b| !b.is_null()).cloned(),
        };

        let outbound = IntegrationRequest {
            method: mapping.endpoint_method.to_uppercase(),
            url: build_url(&mapping.base_url, &mapping.endpoint_path, &request.encoded_query()),
            headers: outbound_headers(request, mapping, body.is_some()),
            body,
            timeout: Duration::from_millis(mapping.timeout_ms.unwrap_or(self.settings.timeout_ms)),
        };

        trace!(
            mapping_id = %mapping.mapping_id,
            method = %outbound.method,
            url = %outbound.url,
            "Calling integration"
        );

        let response = self
            .client
            .send(outbound)
            .await
            .map_err(|e| CallFailure::new(None, e.to_string()))?;

        if !response.is_success() {
            let mut error = format!("HTTP {}", response.status);
            if let Some(reason) = &response.reason {
                error.push(' ');
                error.push_str(reason);
            }
            let snippet = truncate(response.body.trim(), ERROR_BODY_LIMIT);
            if !snippet.is_empty() {
                error.push_str(": ");
                error.push_str(snippet);
            }
            return Err(CallFailure::new(Some(response.status), error));
        }

        let data = if response.body.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&response.body).map_err(|e| {
                CallFailure::new(Some(response.status), format!("Invalid JSON response: {}", e))
            })?
        };

        let data = match &mapping.response_transform {
            Some(reference) => self.transforms.apply(reference, TransformPhase::Response, data).await,
            None => data,
        };

        Ok((response.status, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> RouteMapping {
        RouteMapping {
            mapping_id: "m1".into(),
            integration_id: "i1".into(),
            integration_name: "Registry".into(),
            priority: 0,
            base_url: "http://registry".into(),
            endpoint_path: "/people".into(),
            endpoint_method: "GET".into(),
            request_transform: None,
            response_transform: None,
            cache_enabled: true,
            is_fallback: false,
            headers: BTreeMap::from([("X-Api-Key".to_string(), "k".to_string())]),
            timeout_ms: None,
        }
    }

    #[test]
    fn test_build_url() {
        assert_eq!(build_url("http://a/", "/b", ""), "http://a/b");
        assert_eq!(build_url("http://a//", "b", "x=1"), "http://a/b?x=1");
        assert_eq!(build_url("http://a", "", "x=1"), "http://a?x=1");
        assert_eq!(build_url("http://a", "/b?fixed=1", "x=1"), "http://a/b?fixed=1&x=1");
    }

    #[test]
    fn test_outbound_headers() {
        let request = InboundRequest::new("POST")
            .with_header("Host", "gateway")
            .with_header("Content-Length", "12")
            .with_header("X-Case-Id", "C-1")
            .with_header("x-api-key", "inbound");
        let headers = outbound_headers(&request, &mapping(), true);

        assert!(!headers.contains_key("host"));
        assert!(!headers.contains_key("content-length"));
        assert_eq!(headers.get("x-case-id").map(String::as_str), Some("C-1"));
        assert_eq!(headers.get("x-api-key").map(String::as_str), Some("k"));
        assert_eq!(headers.get("content-type").map(String::as_str), Some("application/json"));

        let headers = outbound_headers(&request, &mapping(), false);
        assert!(!headers.contains_key("content-type"));
    }

    #[test]
    fn test_cache_key_normalization() {
        let query = json!({"a": ["1"], "b": ["2"]});
        let reordered: JsonValue = serde_json::from_str(r#"{"b": ["2"], "a": ["1"]}"#).unwrap();
        let body = json!({"y": 1, "x": 2});

        let k1 = cache_key("m1", "get", &query, Some(&body));
        let k2 = cache_key("m1", "GET", &reordered, Some(&body));
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 64);

        assert_ne!(k1, cache_key("m2", "GET", &query, Some(&body)));
        assert_ne!(k1, cache_key("m1", "POST", &query, Some(&body)));
        assert_ne!(k1, cache_key("m1", "GET", &query, None));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("short", 200), "short");
    }
}
