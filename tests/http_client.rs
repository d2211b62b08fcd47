//! HTTP client tests against a mock server.

use integration_router::client::{ClientError, IntegrationRequest};
use integration_router::config::{AggregationStrategy, EngineConfig, RouteConfig, RouteMapping};
use integration_router::{ExecutionStatus, HttpIntegrationClient, InboundRequest, IntegrationClient, RouteOrchestrator};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(method: &str, url: String) -> IntegrationRequest {
    IntegrationRequest {
        method: method.to_string(),
        url,
        headers: BTreeMap::new(),
        body: None,
        timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_send_json_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/people"))
        .and(header("x-api-key", "k-1"))
        .and(body_json(json!({"name": "Ada"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let mut req = request("post", format!("{}/v1/people", server.uri()));
    req.headers.insert("x-api-key".to_string(), "k-1".to_string());
    req.body = Some(json!({"name": "Ada"}));

    let response = HttpIntegrationClient::new().send(req).await.unwrap();
    assert_eq!(response.status, 201);
    assert!(response.is_success());
    let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(body, json!({"id": 7}));
}

#[tokio::test]
async fn test_non_success_status_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let response = HttpIntegrationClient::new()
        .send(request("GET", format!("{}/down", server.uri())))
        .await
        .unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.reason.as_deref(), Some("Service Unavailable"));
    assert_eq!(response.body, "maintenance");
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut req = request("GET", format!("{}/slow", server.uri()));
    req.timeout = Duration::from_millis(50);

    match HttpIntegrationClient::new().send(req).await {
        Err(ClientError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(50)),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_method_is_rejected() {
    let err = HttpIntegrationClient::new()
        .send(request("NOT A METHOD", "http://127.0.0.1/".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidMethod(_)));
}

#[tokio::test]
async fn test_route_against_live_endpoints() {
    let registry = MockServer::start().await;
    let archive = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/persons"))
        .and(query_param("name", "Ada Lovelace"))
        .and(header("x-request-id", "req-9"))
        .respond_with(ResponseTemplate::new(500).set_body_string("registry error"))
        .expect(1)
        .mount(&registry)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("name", "Ada Lovelace"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": [{"source": {"id": 1, "name": "Ada Lovelace"}}]
        })))
        .expect(1)
        .mount(&archive)
        .await;

    let mapping = |id: &str, base_url: String, endpoint_path: &str| RouteMapping {
        mapping_id: id.to_string(),
        integration_id: id.to_string(),
        integration_name: id.to_string(),
        priority: 0,
        base_url,
        endpoint_path: endpoint_path.to_string(),
        endpoint_method: "GET".to_string(),
        request_transform: None,
        response_transform: None,
        cache_enabled: false,
        is_fallback: false,
        headers: BTreeMap::new(),
        timeout_ms: Some(2_000),
    };

    let mut fallback = mapping("archive", archive.uri(), "search");
    fallback.is_fallback = true;
    fallback.response_transform = Some("$.hits.map(h => h.source)".to_string());

    let config = EngineConfig {
        routes: vec![RouteConfig {
            route_id: "people".to_string(),
            name: "People".to_string(),
            path: "/api/people".to_string(),
            method: "GET".to_string(),
            aggregation_strategy: AggregationStrategy::PriorityOrder,
            fail_on_any_error: false,
            enabled: true,
            aggregation: None,
            mappings: vec![fallback, mapping("registry", registry.uri(), "/persons")],
        }],
        ..Default::default()
    };

    let orchestrator = RouteOrchestrator::from_config(&config, Arc::new(HttpIntegrationClient::new()));
    let inbound = InboundRequest::new("GET")
        .with_query_string("name=Ada%20Lovelace")
        .with_header("X-Request-Id", "req-9");
    let result = orchestrator.execute_route("/api/people", "GET", inbound).await;

    assert_eq!(result.status, ExecutionStatus::Partial);
    assert_eq!(result.data, json!([{"id": 1, "name": "Ada Lovelace"}]));
    assert_eq!(result.calls()[0].status_code, Some(500));
    assert_eq!(
        result.errors.unwrap(),
        vec!["registry (registry): HTTP 500 Internal Server Error: registry error".to_string()]
    );
}
