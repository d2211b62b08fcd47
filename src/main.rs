//! Integration router CLI entry point.
//!
//! Loads a route configuration, executes one route against the live
//! integrations and prints the execution result as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use integration_router::{EngineConfig, HttpIntegrationClient, InboundRequest, RouteOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "integration-router")]
#[command(
    author,
    version,
    about = "Route-binding and aggregation engine for external integrations"
)]
struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, env = "INTEGRATION_ROUTER_CONFIG")]
    config: Option<PathBuf>,

    /// Inbound route path to execute
    #[arg(short, long)]
    route: Option<String>,

    /// Inbound HTTP method
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// JSON request body
    #[arg(long)]
    body: Option<String>,

    /// Query string (k=v&...)
    #[arg(long)]
    query: Option<String>,

    /// Request header as name:value (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

fn print_example_config() {
    let example = r#"# Integration Router Configuration Example
version: "1"

settings:
  # Outbound call timeout (ms); mappings may override
  timeout_ms: 5000
  # Named transform cache lifetime (seconds)
  transform_cache_ttl_secs: 60
  # Integration response cache
  response_cache_ttl_secs: 300
  response_cache_max_entries: 1024
  # Parsed expressions kept in memory
  expression_cache_size: 256

routes:
  # Registry first, archive only when every primary fails
  - route_id: "person-lookup"
    name: "Person lookup"
    path: "/api/people"
    method: GET
    aggregation_strategy: priority_order
    mappings:
      - mapping_id: "registry"
        integration_id: "national-registry"
        integration_name: "National Registry"
        priority: 1
        base_url: "https://registry.example.org"
        endpoint_path: "/v1/persons"
        response_transform: "person-summary"
        cache_enabled: true
        headers:
          x-api-key: "change-me"
      - mapping_id: "archive"
        integration_id: "archive"
        integration_name: "Case Archive"
        priority: 1
        is_fallback: true
        base_url: "https://archive.example.org"
        endpoint_path: "/search"
        response_transform: "$.hits.map(h => h.source)"

  # Query every source and deep-merge the records
  - route_id: "case-search"
    name: "Case search"
    path: "/api/cases/*"
    method: GET
    aggregation_strategy: merge_results
    fail_on_any_error: false
    aggregation:
      type: merge
      merge_strategy: deep
    mappings:
      - mapping_id: "north"
        integration_id: "north-db"
        integration_name: "North"
        base_url: "https://north.example.org"
        endpoint_path: "/cases"
      - mapping_id: "south"
        integration_id: "south-db"
        integration_name: "South"
        base_url: "https://south.example.org"
        endpoint_path: "/cases"
        timeout_ms: 2000

transforms:
  - name: "person-summary"
    transform_type: response
    expression: "$.data"
    rules:
      - id: "name"
        source_field: "full_name"
        target_field: "person.name"
        transform_type: format
        config:
          format: "uppercase"
      - id: "born"
        source_field: "dob"
        target_field: "person.born"
        transform_type: format
        config:
          format: "iso_date_only"
"#;
    println!("{}", example);
}

fn build_request(args: &Args) -> Result<InboundRequest> {
    let mut request = InboundRequest::new(args.method.to_uppercase());

    if let Some(query) = &args.query {
        request = request.with_query_string(query);
    }
    if let Some(body) = &args.body {
        let body = serde_json::from_str(body).context("--body is not valid JSON")?;
        request = request.with_body(body);
    }
    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("Invalid header '{}', expected NAME:VALUE", header);
        };
        request = request.with_header(name.trim(), value.trim());
    }

    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if args.example_config {
        print_example_config();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => EngineConfig::default(),
    };

    config.validate().context("Configuration is invalid")?;

    if args.validate {
        info!(
            routes = config.routes.len(),
            transforms = config.transforms.len(),
            "Configuration is valid"
        );
        return Ok(());
    }

    let Some(route) = &args.route else {
        bail!("--route is required unless --validate or --example-config is given");
    };
    let request = build_request(&args)?;

    let orchestrator = RouteOrchestrator::from_config(&config, Arc::new(HttpIntegrationClient::new()));

    info!(route = %route, method = %request.method, "Executing route");

    let method = request.method.clone();
    let result = orchestrator.execute_route(route, &method, request).await;

    let output = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
    println!("{}", output);

    Ok(())
}
