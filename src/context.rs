//! Inbound request model.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// The request a route is executed for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InboundRequest {
    /// HTTP method
    pub method: String,
    /// Query parameters, repeated keys kept in order
    #[serde(default)]
    pub query: BTreeMap<String, Vec<String>>,
    /// JSON body
    #[serde(default)]
    pub body: Option<JsonValue>,
    /// Headers keyed by lower-case name
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    /// Add parameters parsed from a raw query string.
    pub fn with_query_string(mut self, query: &str) -> Self {
        for (key, values) in parse_query_string(Some(query)) {
            self.query.entry(key).or_default().extend(values);
        }
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    /// Get a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Query encoded as `k=v&...`, keys sorted, values url-encoded.
    pub fn encoded_query(&self) -> String {
        self.query
            .iter()
            .flat_map(|(key, values)| {
                values.iter().map(move |value| {
                    format!("{}={}", urlencoding::encode(key), urlencoding::encode(value))
                })
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Query as a JSON object of value lists.
    pub fn query_json(&self) -> JsonValue {
        JsonValue::Object(
            self.query
                .iter()
                .map(|(k, v)| (k.clone(), JsonValue::from(v.clone())))
                .collect(),
        )
    }

    /// Summary recorded in the execution log. Header and query values are left out.
    pub fn shape(&self) -> RequestShape {
        RequestShape {
            method: self.method.to_uppercase(),
            query_keys: self.query.keys().cloned().collect(),
            header_names: self.headers.keys().cloned().collect(),
            body_type: self.body.as_ref().map(body_type).map(String::from),
            body_keys: match &self.body {
                Some(JsonValue::Object(map)) => map.keys().cloned().collect(),
                _ => vec![],
            },
        }
    }
}

/// Shape of an inbound request, without values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestShape {
    pub method: String,
    pub query_keys: Vec<String>,
    pub header_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_keys: Vec<String>,
}

fn body_type(body: &JsonValue) -> &'static str {
    match body {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Parse a query string into decoded parameter lists.
pub fn parse_query_string(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();

    if let Some(qs) = query {
        let qs = qs.trim_start_matches('?');
        for part in qs.split('&') {
            if let Some((k, v)) = part.split_once('=') {
                let key = urlencoding::decode(k)
                    .unwrap_or_else(|_| k.into())
                    .to_string();
                let value = urlencoding::decode(v)
                    .unwrap_or_else(|_| v.into())
                    .to_string();
                params.entry(key).or_default().push(value);
            } else if !part.is_empty() {
                let key = urlencoding::decode(part)
                    .unwrap_or_else(|_| part.into())
                    .to_string();
                params.entry(key).or_default().push(String::new());
            }
        }
    }

    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_query_string() {
        let params = parse_query_string(Some("foo=bar&baz=qux"));
        assert_eq!(params.get("foo"), Some(&vec!["bar".to_string()]));
        assert_eq!(params.get("baz"), Some(&vec!["qux".to_string()]));
    }

    #[test]
    fn test_parse_query_string_encoded() {
        let params = parse_query_string(Some("?name=hello%20world&flag"));
        assert_eq!(params.get("name"), Some(&vec!["hello world".to_string()]));
        assert_eq!(params.get("flag"), Some(&vec![String::new()]));
    }

    #[test]
    fn test_encoded_query_is_sorted() {
        let request = InboundRequest::new("GET")
            .with_query("z", "last")
            .with_query("a", "x y")
            .with_query("a", "2");
        assert_eq!(request.encoded_query(), "a=x%20y&a=2&z=last");
    }

    #[test]
    fn test_headers_case_insensitive() {
        let request = InboundRequest::new("GET").with_header("X-Case-Id", "C-1");
        assert_eq!(request.header("x-case-id"), Some("C-1"));
        assert_eq!(request.header("X-CASE-ID"), Some("C-1"));
    }

    #[test]
    fn test_shape_omits_values() {
        let request = InboundRequest::new("post")
            .with_query_string("q=secret")
            .with_header("Authorization", "Bearer token")
            .with_body(json!({"name": "Ada"}));
        let shape = request.shape();
        assert_eq!(shape.method, "POST");
        assert_eq!(shape.query_keys, vec!["q"]);
        assert_eq!(shape.header_names, vec!["authorization"]);
        assert_eq!(shape.body_type.as_deref(), Some("object"));
        assert_eq!(shape.body_keys, vec!["name"]);
        let text = serde_json::to_string(&shape).unwrap();
        assert!(!text.contains("secret"));
        assert!(!text.contains("Bearer"));
    }
}
