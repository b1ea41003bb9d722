//! GraphQL exchange detection and OAuth token-request detection.

use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::model::CapturedExchange;
use crate::token_analyzer;

/// Whether an exchange is a GraphQL call: path contains `/graphql`, or
/// content-type is `application/graphql`, or the body is JSON with a
/// string `query` field.
pub fn is_graphql(exchange: &CapturedExchange) -> bool {
    if exchange.url.contains("/graphql") {
        return true;
    }
    if exchange
        .request_header("content-type")
        .is_some_and(|ct| ct.eq_ignore_ascii_case("application/graphql"))
    {
        return true;
    }
    exchange
        .request_json()
        .and_then(|v| v.get("query").and_then(Value::as_str).map(|_| ()))
        .is_some()
}

static OPERATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:query|mutation|subscription)\s+(\w+)").expect("valid regex"));

/// GraphQL operation name: the body's `operationName` if present,
/// otherwise the first `query|mutation|subscription Name` captured
/// from the query text, otherwise `Anonymous`.
pub fn graphql_operation_name(exchange: &CapturedExchange) -> String {
    let Some(body) = exchange.request_json() else {
        return "Anonymous".to_string();
    };

    if let Some(name) = body.get("operationName").and_then(Value::as_str) {
        if !name.is_empty() {
            return name.to_string();
        }
    }

    if let Some(query_text) = body.get("query").and_then(Value::as_str) {
        if let Some(captures) = OPERATION_RE.captures(query_text) {
            return captures[1].to_string();
        }
    }

    "Anonymous".to_string()
}

/// Dotted paths of GraphQL variables that should be treated as dynamic
/// (numeric, or cursor-ish strings), scoped under `variables.*`.
pub fn graphql_dynamic_variables(exchange: &CapturedExchange) -> Vec<String> {
    let Some(body) = exchange.request_json() else {
        return Vec::new();
    };
    let Some(variables) = body.get("variables") else {
        return Vec::new();
    };

    token_analyzer::detect_body_variables(variables)
        .into_iter()
        .map(|path| format!("variables.{path}"))
        .collect()
}

/// An OAuth token request detected from a captured POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub grant_type: String,
    pub scope: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

/// Detect whether `exchange` is an OAuth token request. Requires POST,
/// a URL containing `/token` or `/oauth`, a `grant_type` of
/// `refresh_token` or `client_credentials`, and a `client_id` (from the
/// body or HTTP Basic auth). Returns `None` otherwise, including for
/// `authorization_code` grants (not reproducible without a fresh code).
pub fn detect_oauth_token_request(exchange: &CapturedExchange) -> Option<OAuthTokenRequest> {
    if !exchange.method.eq_ignore_ascii_case("POST") {
        return None;
    }

    let url = Url::parse(&exchange.url).ok()?;
    if !url.path().contains("/token") && !url.path().contains("/oauth") {
        return None;
    }

    let params = form_params(exchange, &url)?;

    let grant_type = params.get("grant_type").cloned()?;
    if grant_type != "refresh_token" && grant_type != "client_credentials" {
        return None;
    }

    let client_id = params
        .get("client_id")
        .cloned()
        .or_else(|| basic_auth_client_id(exchange))?;

    let mut token_endpoint_url = url.clone();
    token_endpoint_url.set_query(None);

    Some(OAuthTokenRequest {
        token_endpoint: token_endpoint_url.to_string(),
        client_id,
        grant_type,
        scope: params.get("scope").cloned(),
        client_secret: params.get("client_secret").cloned(),
        refresh_token: params.get("refresh_token").cloned(),
    })
}

/// Gather candidate parameters from the URL query string, plus the
/// body parsed as form-urlencoded (default) or JSON
/// (`content-type: application/json`).
fn form_params(exchange: &CapturedExchange, url: &Url) -> Option<std::collections::HashMap<String, String>> {
    let mut params: std::collections::HashMap<String, String> =
        url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();

    let Some(body) = exchange.request_body.as_deref() else {
        return Some(params);
    };

    let is_json = exchange
        .request_header("content-type")
        .is_some_and(|ct| ct.eq_ignore_ascii_case("application/json"));

    if is_json {
        if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
            for (k, v) in map {
                if let Some(s) = v.as_str() {
                    params.insert(k, s.to_string());
                }
            }
        }
    } else {
        for (k, v) in url::form_urlencoded::parse(body) {
            params.insert(k.into_owned(), v.into_owned());
        }
    }

    Some(params)
}

fn basic_auth_client_id(exchange: &CapturedExchange) -> Option<String> {
    let header = exchange.request_header("authorization")?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    decoded.split_once(':').map(|(id, _secret)| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use chrono::Utc;

    fn exchange_with(method: &str, url: &str, body: Option<&str>, content_type: Option<&str>) -> CapturedExchange {
        let mut headers = Vec::new();
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        CapturedExchange {
            url: url.to_string(),
            method: method.to_string(),
            request_headers: headers,
            request_body: body.map(|s| s.as_bytes().to_vec()),
            status: 200,
            response_headers: Vec::new(),
            response_body: Vec::new(),
            content_type: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn graphql_detected_by_path() {
        let ex = exchange_with("POST", "https://api.example.com/graphql", None, None);
        assert!(is_graphql(&ex));
    }

    #[test]
    fn graphql_detected_by_query_field() {
        let ex = exchange_with(
            "POST",
            "https://api.example.com/v1",
            Some(r#"{"query":"query GetUser { user { id } }"}"#),
            Some("application/json"),
        );
        assert!(is_graphql(&ex));
        assert_eq!(graphql_operation_name(&ex), "GetUser");
    }

    #[test]
    fn graphql_operation_name_falls_back_to_anonymous() {
        let ex = exchange_with(
            "POST",
            "https://api.example.com/graphql",
            Some(r#"{"query":"{ user { id } }"}"#),
            Some("application/json"),
        );
        assert_eq!(graphql_operation_name(&ex), "Anonymous");
    }

    #[test]
    fn oauth_refresh_token_request_detected() {
        let ex = exchange_with(
            "POST",
            "https://auth.example.com/oauth/token",
            Some("grant_type=refresh_token&client_id=app&refresh_token=rt_old"),
            Some("application/x-www-form-urlencoded"),
        );
        let detected = detect_oauth_token_request(&ex).unwrap();
        assert_eq!(detected.grant_type, "refresh_token");
        assert_eq!(detected.client_id, "app");
        assert_eq!(detected.refresh_token, Some("rt_old".to_string()));
    }

    #[test]
    fn oauth_authorization_code_grant_is_rejected() {
        let ex = exchange_with(
            "POST",
            "https://auth.example.com/oauth/token",
            Some("grant_type=authorization_code&client_id=app&code=abc"),
            Some("application/x-www-form-urlencoded"),
        );
        assert!(detect_oauth_token_request(&ex).is_none());
    }

    #[test]
    fn oauth_client_id_falls_back_to_basic_auth() {
        let creds = base64::engine::general_purpose::STANDARD.encode("app:secret");
        let mut ex = exchange_with(
            "POST",
            "https://auth.example.com/token",
            Some("grant_type=client_credentials"),
            Some("application/x-www-form-urlencoded"),
        );
        ex.request_headers.push(("authorization".to_string(), format!("Basic {creds}")));

        let detected = detect_oauth_token_request(&ex).unwrap();
        assert_eq!(detected.client_id, "app");
    }

    #[test]
    fn non_post_is_never_oauth() {
        let ex = exchange_with("GET", "https://auth.example.com/oauth/token", None, None);
        assert!(detect_oauth_token_request(&ex).is_none());
    }
}
