//! Replays a previously learned endpoint directly against its origin,
//! refreshing expired credentials on demand.

use std::collections::HashMap;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use tokio::time::timeout;

use crate::contract_diff::{self, DiffEntry};
use crate::dispatcher::RefreshDispatcher;
use crate::model::{Endpoint, SkillFile};
use crate::url_safety;
use crate::vault::Vault;

/// Headers that are never copied from an endpoint's template onto an
/// outbound request. `authorization` is rebuilt from the vault only.
const FORBIDDEN_HEADERS: &[&str] = &["host", "cookie", "authorization"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TIMEOUT: Duration = Duration::from_secs(30);

/// Inputs to a single endpoint replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Path-placeholder and query-param overrides.
    pub params: HashMap<String, String>,
    /// Force a refresh before the first attempt.
    pub fresh: bool,
    /// Truncate the decoded body past this many bytes.
    pub max_bytes: Option<usize>,
    /// Per-call timeout; clamped to `[5s, 30s]`, default 10s.
    pub timeout: Option<Duration>,
    /// Skips SSRF validation. Only honored when the caller also sets
    /// `APITAP_SKIP_SSRF_CHECK=1`, wired by the orchestration façade,
    /// not meant for direct use.
    pub skip_ssrf_check: bool,
}

/// Outcome of a replay.
#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub data: Value,
    pub refreshed: bool,
    pub truncated: bool,
    pub contract_warnings: Vec<DiffEntry>,
}

/// Replays `endpoint_id` from `skill` against its live origin.
pub async fn replay(
    skill: &SkillFile,
    endpoint_id: &str,
    options: &ReplayOptions,
    vault: Option<&Vault>,
    dispatcher: Option<&RefreshDispatcher>,
) -> crate::Result<ReplayResult> {
    let endpoint = skill
        .endpoints
        .iter()
        .find(|e| e.id == endpoint_id)
        .ok_or_else(|| crate::Error::EndpointNotFound(endpoint_id.to_string()))?;

    if options.fresh {
        if let (Some(vault), Some(dispatcher)) = (vault, dispatcher) {
            let oauth_config = skill.auth.as_ref().and_then(|a| a.oauth_config.as_ref());
            dispatcher.refresh(&skill.domain, oauth_config, vault).await;
        }
    }

    let url = build_url(skill, endpoint, &options.params)?;
    let body = build_body(endpoint, &options.params, vault);
    let mut headers = build_headers(endpoint, vault);

    if !options.skip_ssrf_check {
        let verdict = url_safety::resolve_and_validate(&url).await;
        if !verdict.safe {
            return Err(crate::Error::Ssrf(format!(
                "unsafe replay target {url}: {}",
                verdict.reason.unwrap_or_default()
            )));
        }
    }

    let timeout_duration = clamp_timeout(options.timeout);
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(crate::Error::Http)?;

    let (status, response_headers, raw_body) =
        fetch_one_hop(&client, &endpoint.method, &url, &headers, body.clone(), timeout_duration, options.skip_ssrf_check).await?;

    let mut status = status;
    let mut response_headers = response_headers;
    let mut raw_body = raw_body;
    let mut refreshed = false;

    if status == 401 {
        if let (Some(vault), Some(dispatcher)) = (vault, dispatcher) {
            let oauth_config = skill.auth.as_ref().and_then(|a| a.oauth_config.as_ref());
            let has_body_refresh = endpoint
                .body_template
                .as_ref()
                .map(|t| !t.refreshable_tokens.is_empty())
                .unwrap_or(false);
            if oauth_config.is_some() || has_body_refresh {
                let outcome = dispatcher.refresh(&skill.domain, oauth_config, vault).await;
                if outcome.success {
                    headers = build_headers(endpoint, Some(vault));
                    let retry_body = build_body(endpoint, &options.params, Some(vault));
                    let (retry_status, retry_headers, retry_body_bytes) = fetch_one_hop(
                        &client,
                        &endpoint.method,
                        &url,
                        &headers,
                        retry_body,
                        timeout_duration,
                        options.skip_ssrf_check,
                    )
                    .await?;
                    status = retry_status;
                    response_headers = retry_headers;
                    raw_body = retry_body_bytes;
                    refreshed = true;
                }
            }
        }
    }

    let content_type = response_headers
        .get("content-type")
        .cloned()
        .unwrap_or_default();
    let (mut data, mut truncated) = decode_body(&raw_body, &content_type);

    if let Some(max_bytes) = options.max_bytes {
        if raw_body.len() > max_bytes {
            data = truncate_value(data, max_bytes);
            truncated = true;
        }
    }

    let contract_warnings = match &endpoint.response_schema {
        Some(schema) => contract_diff::diff(schema, &data),
        None => Vec::new(),
    };

    Ok(ReplayResult {
        status,
        headers: response_headers,
        data,
        refreshed,
        truncated,
        contract_warnings,
    })
}

/// Options for [`replay_multiple`].
#[derive(Debug, Clone)]
pub struct ReplayBatchOptions {
    pub max_concurrency: usize,
}

impl Default for ReplayBatchOptions {
    fn default() -> Self {
        Self { max_concurrency: 8 }
    }
}

/// A single request in a batch replay.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub domain: String,
    pub endpoint_id: String,
    pub options: ReplayOptions,
}

/// One result in a batch replay, carrying its origin for correlation.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub domain: String,
    pub endpoint_id: String,
    pub status: Option<u16>,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub truncated: bool,
}

/// Replays many requests, grouping by domain so each skill file is
/// loaded once, and bounding fan-out to `options.max_concurrency`.
pub async fn replay_multiple(
    store: &crate::skill_store::SkillStore,
    requests: Vec<BatchRequest>,
    options: ReplayBatchOptions,
    vault: Option<&Vault>,
    dispatcher: Option<&RefreshDispatcher>,
) -> Vec<BatchResult> {
    use futures::stream::{self, StreamExt};

    let mut skills: HashMap<String, crate::Result<SkillFile>> = HashMap::new();
    for req in &requests {
        skills
            .entry(req.domain.clone())
            .or_insert_with(|| store.load(&req.domain, None));
    }

    stream::iter(requests)
        .map(|req| {
            let skill = skills.get(&req.domain);
            async move {
                let skill = match skill {
                    Some(Ok(skill)) => skill,
                    Some(Err(err)) => {
                        return BatchResult {
                            domain: req.domain,
                            endpoint_id: req.endpoint_id,
                            status: None,
                            data: None,
                            error: Some(err.to_string()),
                            truncated: false,
                        }
                    }
                    None => unreachable!("every request's domain was pre-loaded"),
                };

                match replay(skill, &req.endpoint_id, &req.options, vault, dispatcher).await {
                    Ok(result) => BatchResult {
                        domain: req.domain,
                        endpoint_id: req.endpoint_id,
                        status: Some(result.status),
                        data: Some(result.data),
                        error: None,
                        truncated: result.truncated,
                    },
                    Err(err) => BatchResult {
                        domain: req.domain,
                        endpoint_id: req.endpoint_id,
                        status: None,
                        data: None,
                        error: Some(err.to_string()),
                        truncated: false,
                    },
                }
            }
        })
        .buffer_unordered(options.max_concurrency.max(1))
        .collect()
        .await
}

fn clamp_timeout(requested: Option<Duration>) -> Duration {
    match requested {
        Some(d) if d < MIN_TIMEOUT => MIN_TIMEOUT,
        Some(d) if d > MAX_TIMEOUT => MAX_TIMEOUT,
        Some(d) => d,
        None => DEFAULT_TIMEOUT,
    }
}

fn build_url(skill: &SkillFile, endpoint: &Endpoint, params: &HashMap<String, String>) -> crate::Result<String> {
    let mut path = endpoint.path.clone();
    for (name, value) in params {
        let placeholder = format!(":{name}");
        if path.contains(&placeholder) {
            let encoded = utf8_percent_encode(value, NON_ALPHANUMERIC).to_string();
            path = path.replace(&placeholder, &encoded);
        }
    }

    let base = skill.base_url.trim_end_matches('/');
    let mut url = format!("{base}{path}");

    let query_overrides: Vec<(&str, &str)> = endpoint
        .query_params
        .iter()
        .map(|qp| {
            let value = params
                .get(&qp.name)
                .map(String::as_str)
                .unwrap_or(qp.example.as_str());
            (qp.name.as_str(), value)
        })
        .collect();

    if !query_overrides.is_empty() {
        let query: String = query_overrides
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(name, NON_ALPHANUMERIC),
                    utf8_percent_encode(value, NON_ALPHANUMERIC)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        url.push('?');
        url.push_str(&query);
    }

    Ok(url)
}

fn build_body(endpoint: &Endpoint, params: &HashMap<String, String>, vault: Option<&Vault>) -> Option<(String, Vec<u8>)> {
    let template = endpoint.body_template.as_ref()?;
    let mut body = template.template.clone();

    for path in &template.variables {
        if let Some(value) = params.get(path.as_str()) {
            set_by_dotted_path(&mut body, path, Value::String(value.clone()));
        }
    }

    if let Some(vault) = vault {
        if let Some(auth) = vault.retrieve(&endpoint_domain_hint(endpoint)) {
            for path in &template.refreshable_tokens {
                if let Some(token) = auth.session_tokens.get(path.as_str()) {
                    set_by_dotted_path(&mut body, path, Value::String(token.value.clone()));
                }
            }
        }
    }

    let bytes = serde_json::to_vec(&body).ok()?;
    Some((template.content_type.clone(), bytes))
}

/// Best-effort domain hint for looking up refreshable session tokens
/// when rebuilding a request body. The vault is keyed by domain, which
/// a `BodyTemplate` does not otherwise carry; callers that need exact
/// per-endpoint session lookup should resolve it via the skill's own
/// domain before calling `build_body` in a future revision.
fn endpoint_domain_hint(endpoint: &Endpoint) -> String {
    url::Url::parse(&endpoint.example_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

fn set_by_dotted_path(root: &mut Value, path: &str, value: Value) {
    let mut cursor = root;
    let parts: Vec<&str> = path.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let Value::Object(map) = cursor {
                map.insert(part.to_string(), value);
            }
            return;
        }
        cursor = match cursor.get_mut(*part) {
            Some(next) => next,
            None => return,
        };
    }
}

fn build_headers(endpoint: &Endpoint, vault: Option<&Vault>) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for (name, value) in &endpoint.headers {
        let lower = name.to_ascii_lowercase();
        if FORBIDDEN_HEADERS.contains(&lower.as_str()) || lower.starts_with("x-forwarded") {
            continue;
        }
        headers.insert(lower, value.clone());
    }

    if let Some(vault) = vault {
        let domain = url::Url::parse(&endpoint.example_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        if let Some(domain) = domain {
            if let Some(auth) = vault.retrieve(&domain) {
                for (_, value) in headers.iter_mut() {
                    if value == "[stored]" {
                        *value = auth.header_value.clone();
                    }
                }
                let header_name = auth.header_name.to_ascii_lowercase();
                if headers.get(&header_name).map(String::as_str) == Some("[stored]") || !headers.contains_key(&header_name) {
                    headers.insert(header_name, auth.header_value.clone());
                }
            }
        }
    }

    headers
}

async fn fetch_one_hop(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    headers: &HashMap<String, String>,
    body: Option<(String, Vec<u8>)>,
    timeout_duration: Duration,
    skip_ssrf_check: bool,
) -> crate::Result<(u16, HashMap<String, String>, Vec<u8>)> {
    let (status, response_headers, raw_body, location) =
        send_request(client, method, url, headers, body.clone(), timeout_duration).await?;

    if (300..400).contains(&status) {
        if let Some(location) = location {
            if !skip_ssrf_check {
                let verdict = url_safety::validate_redirect(&location).await;
                if !verdict.safe {
                    return Err(crate::Error::Ssrf(format!(
                        "unsafe redirect target {location}: {}",
                        verdict.reason.unwrap_or_default()
                    )));
                }
            }
            return send_request(client, method, &location, headers, body, timeout_duration).await.map(
                |(status, headers, body, _)| (status, headers, body),
            );
        }
    }

    Ok((status, response_headers, raw_body))
}

async fn send_request(
    client: &reqwest::Client,
    method: &str,
    url: &str,
    headers: &HashMap<String, String>,
    body: Option<(String, Vec<u8>)>,
    timeout_duration: Duration,
) -> crate::Result<(u16, HashMap<String, String>, Vec<u8>, Option<String>)> {
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| crate::Error::InvalidInput(format!("invalid HTTP method: {method}")))?;

    let mut request = client.request(method, url);
    for (name, value) in headers {
        request = request.header(name, value);
    }
    if let Some((content_type, bytes)) = body {
        request = request.header("content-type", content_type).body(bytes);
    }

    let response = timeout(timeout_duration, request.send())
        .await
        .map_err(|_| crate::Error::Server {
            status: 0,
            message: format!("request to {url} timed out after {timeout_duration:?}"),
        })??;

    let status = response.status().as_u16();
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let response_headers: HashMap<String, String> = response
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let raw_body = response.bytes().await?.to_vec();

    Ok((status, response_headers, raw_body, location))
}

fn decode_body(raw: &[u8], content_type: &str) -> (Value, bool) {
    let is_json = content_type
        .split(';')
        .next()
        .map(|t| t.trim().eq_ignore_ascii_case("application/json") || t.trim().ends_with("+json"))
        .unwrap_or(false);

    if is_json {
        match serde_json::from_slice(raw) {
            Ok(value) => (value, false),
            Err(_) => (Value::String(String::from_utf8_lossy(raw).to_string()), false),
        }
    } else {
        (Value::String(String::from_utf8_lossy(raw).to_string()), false)
    }
}

fn truncate_value(value: Value, max_bytes: usize) -> Value {
    match value {
        Value::String(s) => {
            let truncated: String = s.chars().take(max_bytes).collect();
            Value::String(truncated)
        }
        other => {
            let serialized = serde_json::to_string(&other).unwrap_or_default();
            let truncated: String = serialized.chars().take(max_bytes).collect();
            Value::String(truncated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_timeout_enforces_bounds() {
        assert_eq!(clamp_timeout(None), DEFAULT_TIMEOUT);
        assert_eq!(clamp_timeout(Some(Duration::from_secs(1))), MIN_TIMEOUT);
        assert_eq!(clamp_timeout(Some(Duration::from_secs(60))), MAX_TIMEOUT);
        assert_eq!(clamp_timeout(Some(Duration::from_secs(20))), Duration::from_secs(20));
    }

    #[test]
    fn build_url_substitutes_path_placeholders_and_appends_query() {
        let skill = SkillFile {
            version: "1.2".to_string(),
            domain: "api.example.com".to_string(),
            base_url: "https://api.example.com".to_string(),
            captured_at: chrono::Utc::now(),
            endpoints: vec![],
            metadata: crate::model::SkillMetadata {
                capture_count: 0,
                filtered_count: 0,
                tool_version: "test".to_string(),
                browser_cost: None,
            },
            auth: None,
            provenance: crate::model::Provenance::Unsigned,
            signature: None,
        };
        let endpoint = Endpoint {
            id: "get-users-id".to_string(),
            method: "GET".to_string(),
            path: "/users/:id".to_string(),
            operation_name: None,
            query_params: vec![crate::model::QueryParam {
                name: "limit".to_string(),
                param_type: "number".to_string(),
                example: "10".to_string(),
            }],
            headers: vec![],
            response_shape: crate::model::ResponseShape {
                kind: crate::model::ResponseShapeKind::Object,
                fields: None,
            },
            response_schema: None,
            body_template: None,
            pagination: None,
            replayability: None,
            response_size_bytes: 0,
            example_url: "https://api.example.com/users/1".to_string(),
            response_preview: None,
            observation_count: 1,
        };
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());

        let url = build_url(&skill, &endpoint, &params).unwrap();
        assert_eq!(url, "https://api.example.com/users/42?limit=10");
    }

    #[test]
    fn build_headers_drops_forbidden_headers() {
        let endpoint = Endpoint {
            id: "get-items".to_string(),
            method: "GET".to_string(),
            path: "/items".to_string(),
            operation_name: None,
            query_params: vec![],
            headers: vec![
                ("Authorization".to_string(), "Bearer abc".to_string()),
                ("Cookie".to_string(), "session=1".to_string()),
                ("X-Forwarded-For".to_string(), "1.2.3.4".to_string()),
                ("Accept".to_string(), "application/json".to_string()),
            ],
            response_shape: crate::model::ResponseShape {
                kind: crate::model::ResponseShapeKind::Array,
                fields: None,
            },
            response_schema: None,
            body_template: None,
            pagination: None,
            replayability: None,
            response_size_bytes: 0,
            example_url: "https://api.example.com/items".to_string(),
            response_preview: None,
            observation_count: 1,
        };

        let headers = build_headers(&endpoint, None);
        assert!(!headers.contains_key("authorization"));
        assert!(!headers.contains_key("cookie"));
        assert!(!headers.contains_key("x-forwarded-for"));
        assert_eq!(headers.get("accept"), Some(&"application/json".to_string()));
    }
}
