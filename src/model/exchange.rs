use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single request/response pair observed by the instrumented browser
/// driver. Immutable once handed to a [`crate::generator::SkillGenerator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedExchange {
    /// Full request URL, including query string.
    pub url: String,
    /// HTTP method, upper-cased (`GET`, `POST`, ...).
    pub method: String,
    /// Request headers with case-preserved keys, in observation order.
    pub request_headers: Vec<(String, String)>,
    /// Raw request body bytes, if any.
    #[serde(default)]
    pub request_body: Option<Vec<u8>>,
    /// HTTP response status code.
    pub status: u16,
    /// Response headers with case-preserved keys.
    pub response_headers: Vec<(String, String)>,
    /// Raw response body bytes.
    #[serde(default)]
    pub response_body: Vec<u8>,
    /// `Content-Type` response header value, if present.
    pub content_type: Option<String>,
    /// Wall-clock time the exchange was observed.
    pub timestamp: DateTime<Utc>,
}

impl CapturedExchange {
    /// Case-insensitive request header lookup.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.request_headers, name)
    }

    /// Case-insensitive response header lookup.
    pub fn response_header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.response_headers, name)
    }

    /// Parse the request body as JSON, if present and valid.
    pub fn request_json(&self) -> Option<serde_json::Value> {
        self.request_body
            .as_ref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }

    /// Parse the response body as JSON, if valid.
    pub fn response_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.response_body).ok()
    }
}

fn header_lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CapturedExchange {
        CapturedExchange {
            url: "https://api.example.com/items?limit=10".to_string(),
            method: "GET".to_string(),
            request_headers: vec![("Authorization".to_string(), "Bearer abc".to_string())],
            request_body: None,
            status: 200,
            response_headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            response_body: br#"{"id":1}"#.to_vec(),
            content_type: Some("application/json".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let exchange = sample();
        assert_eq!(exchange.request_header("authorization"), Some("Bearer abc"));
        assert_eq!(exchange.response_header("content-type"), Some("application/json"));
    }

    #[test]
    fn response_json_parses_body() {
        let exchange = sample();
        let value = exchange.response_json().unwrap();
        assert_eq!(value["id"], 1);
    }
}
