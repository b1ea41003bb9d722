//! Per-hostname accumulator that turns captured exchanges into a
//! [`SkillFile`].

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde_json::Value;
use url::Url;

use crate::detectors;
use crate::model::{
    AuthDescriptor, AuthKind, BodyTemplate, BrowserCost, Endpoint, OAuthConfig, PaginationDescriptor,
    PaginationKind as ModelPaginationKind, Provenance, QueryParam, ResponseShape, ResponseShapeKind, SchemaNode,
    SchemaNodeKind, SkillFile, SkillMetadata, StoredAuth,
};
use crate::model::CapturedExchange;
use crate::path_infer::{self, PaginationKind};
use crate::token_analyzer;

const SCHEMA_DEPTH_CAP: usize = 5;

/// Headers preserved verbatim (case-insensitive) in an endpoint's
/// header template, on top of the `x-*` rule.
const PRESERVED_HEADERS: &[&str] =
    &["authorization", "content-type", "accept", "x-api-key", "x-csrf-token", "x-requested-with"];

/// Accumulates observed exchanges for one domain into endpoints,
/// extracted credentials, and OAuth configuration.
pub struct SkillGenerator {
    domain: String,
    base_url: String,
    endpoints: HashMap<String, Endpoint>,
    capture_count: u64,
    filtered_count: u64,
    network_bytes: u64,
    dom_bytes: u64,
    request_count: u64,
    captcha_risk: bool,
    capture_schema: bool,
    extracted_auth: Vec<StoredAuth>,
    oauth_config: Option<OAuthConfig>,
    oauth_refresh_token: Option<String>,
    oauth_client_secret: Option<String>,
}

impl SkillGenerator {
    pub fn new(domain: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            base_url: base_url.into(),
            endpoints: HashMap::new(),
            capture_count: 0,
            filtered_count: 0,
            network_bytes: 0,
            dom_bytes: 0,
            request_count: 0,
            captcha_risk: false,
            capture_schema: true,
            extracted_auth: Vec::new(),
            oauth_config: None,
            oauth_refresh_token: None,
            oauth_client_secret: None,
        }
    }

    /// Disable recursive response-schema capture (response shape
    /// summaries are always recorded).
    pub fn without_schema_snapshot(mut self) -> Self {
        self.capture_schema = false;
        self
    }

    /// Record one accepted exchange. Returns the newly created endpoint
    /// on first sight of its key, `None` on a duplicate (only counters
    /// advance).
    pub fn add_exchange(&mut self, exchange: &CapturedExchange) -> Option<Endpoint> {
        self.capture_count += 1;
        self.request_count += 1;

        let is_graphql = detectors::is_graphql(exchange);
        let url = Url::parse(&exchange.url).ok()?;
        let raw_path = path_infer::clean_framework_path(url.path());
        let path = path_infer::parameterize_path(&raw_path);
        let method = exchange.method.to_uppercase();

        let operation_name = is_graphql.then(|| detectors::graphql_operation_name(exchange));
        let key = match &operation_name {
            Some(op) => format!("{method} {path} :: {op}"),
            None => format!("{method} {path}"),
        };

        if let Some(existing) = self.endpoints.get_mut(&key) {
            existing.observation_count += 1;
            self.record_oauth(exchange);
            return None;
        }

        let id = endpoint_id(&method, &path, operation_name.as_deref());
        let (headers, endpoint_extracted_auth) = self.filter_headers(exchange);
        self.extracted_auth.extend(endpoint_extracted_auth);

        let query_params = self.query_params(&url);
        let pagination = path_infer::detect_pagination(
            &query_params.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
        )
        .map(to_model_pagination);

        let response_json = exchange.response_json();
        let response_shape = response_shape(response_json.as_ref());
        let response_schema = self
            .capture_schema
            .then(|| response_json.as_ref().map(|v| build_schema(v, 0)))
            .flatten();

        let body_template = self.build_body_template(exchange, is_graphql, &operation_name);

        let endpoint = Endpoint {
            id: id.clone(),
            method,
            path,
            operation_name,
            query_params,
            headers,
            response_shape,
            response_schema,
            body_template,
            pagination,
            replayability: None,
            response_size_bytes: exchange.response_body.len(),
            example_url: exchange.url.clone(),
            response_preview: None,
            observation_count: 1,
        };

        self.endpoints.insert(key, endpoint.clone());
        self.record_oauth(exchange);
        Some(endpoint)
    }

    /// Increment the filtered-exchange counter.
    pub fn record_filtered(&mut self) {
        self.filtered_count += 1;
    }

    /// Add to the running total of network bytes observed this session.
    pub fn add_network_bytes(&mut self, n: u64) {
        self.network_bytes += n;
    }

    /// Add to the running total of DOM bytes observed this session.
    pub fn add_dom_bytes(&mut self, n: u64) {
        self.dom_bytes += n;
    }

    /// Record whether the browsing session showed CAPTCHA friction.
    pub fn set_captcha_risk(&mut self, risk: bool) {
        self.captcha_risk = risk;
    }

    /// Credentials extracted from header values classified as likely
    /// tokens during header filtering.
    pub fn get_extracted_auth(&self) -> Vec<StoredAuth> {
        self.extracted_auth.clone()
    }

    pub fn get_oauth_config(&self) -> Option<OAuthConfig> {
        self.oauth_config.clone()
    }

    pub fn get_oauth_refresh_token(&self) -> Option<String> {
        self.oauth_refresh_token.clone()
    }

    pub fn get_oauth_client_secret(&self) -> Option<String> {
        self.oauth_client_secret.clone()
    }

    /// Finalize the accumulator into a signable [`SkillFile`].
    pub fn to_skill_file(&self, domain: &str) -> SkillFile {
        let browser_mode = self
            .extracted_auth
            .iter()
            .any(|a| matches!(a.kind, AuthKind::Cookie));

        let auth = if self.extracted_auth.is_empty() && self.oauth_config.is_none() && !self.captcha_risk {
            None
        } else {
            Some(AuthDescriptor {
                browser_mode,
                captcha_risk: self.captcha_risk,
                ttl_hint: None,
                refresh_url: self.oauth_config.as_ref().map(|c| c.token_endpoint.clone()),
                oauth_config: self.oauth_config.clone(),
            })
        };

        SkillFile {
            version: crate::model::CURRENT_VERSION.to_string(),
            domain: domain.to_string(),
            base_url: self.base_url.clone(),
            captured_at: Utc::now(),
            endpoints: self.endpoints.values().cloned().collect(),
            metadata: SkillMetadata {
                capture_count: self.capture_count,
                filtered_count: self.filtered_count,
                tool_version: env!("CARGO_PKG_VERSION").to_string(),
                browser_cost: Some(BrowserCost {
                    dom_bytes: self.dom_bytes,
                    total_network_bytes: self.network_bytes,
                    total_requests: self.request_count,
                }),
            },
            auth,
            provenance: Provenance::SelfSigned,
            signature: None,
        }
    }

    fn record_oauth(&mut self, exchange: &CapturedExchange) {
        let Some(detected) = detectors::detect_oauth_token_request(exchange) else {
            return;
        };
        if self.oauth_config.is_none() {
            self.oauth_config = Some(OAuthConfig {
                token_endpoint: detected.token_endpoint,
                client_id: detected.client_id,
                grant_type: detected.grant_type,
                scope: detected.scope,
            });
        }
        if detected.refresh_token.is_some() {
            self.oauth_refresh_token = detected.refresh_token;
        }
        if detected.client_secret.is_some() {
            self.oauth_client_secret = detected.client_secret;
        }
    }

    fn filter_headers(&self, exchange: &CapturedExchange) -> (Vec<(String, String)>, Vec<StoredAuth>) {
        let mut kept = Vec::new();
        let mut extracted = Vec::new();

        for (name, value) in &exchange.request_headers {
            let lower = name.to_lowercase();
            let is_x_header = lower.starts_with("x-") && !lower.starts_with("x-forwarded");
            if !PRESERVED_HEADERS.contains(&lower.as_str()) && !is_x_header {
                continue;
            }

            if token_analyzer::is_likely_token(&lower, value).is_some() {
                kept.push((name.clone(), "[stored]".to_string()));
                extracted.push(StoredAuth {
                    kind: header_auth_kind(&lower),
                    header_name: name.clone(),
                    header_value: value.clone(),
                    session_tokens: HashMap::new(),
                    session: None,
                    oauth_refresh_token: None,
                    oauth_client_secret: None,
                });
            } else {
                kept.push((name.clone(), value.clone()));
            }
        }

        (kept, extracted)
    }

    fn query_params(&self, url: &Url) -> Vec<QueryParam> {
        url.query_pairs()
            .map(|(name, value)| {
                let example = token_analyzer::scrub_pii(&value);
                QueryParam {
                    name: name.into_owned(),
                    param_type: infer_scalar_type(&value),
                    example,
                }
            })
            .collect()
    }

    fn build_body_template(
        &mut self,
        exchange: &CapturedExchange,
        is_graphql: bool,
        operation_name: &Option<String>,
    ) -> Option<BodyTemplate> {
        if !matches!(exchange.method.to_uppercase().as_str(), "POST" | "PUT" | "PATCH") {
            return None;
        }
        let body = exchange.request_body.as_ref()?;
        let content_type = exchange
            .request_header("content-type")
            .unwrap_or("application/json")
            .to_string();

        if is_graphql {
            let json: Value = serde_json::from_slice(body).ok()?;
            let query_text = json.get("query")?.as_str()?.to_string();
            let _ = operation_name;
            let variables = detectors::graphql_dynamic_variables(exchange);
            return Some(BodyTemplate {
                content_type,
                template: Value::String(query_text),
                variables,
                refreshable_tokens: Vec::new(),
            });
        }

        let mut json: Value = serde_json::from_slice(body).ok()?;
        let variables = token_analyzer::detect_body_variables(&json);
        let refreshable = token_analyzer::detect_refreshable_tokens(&json);
        for path in &refreshable {
            clear_path(&mut json, path);
        }

        Some(BodyTemplate {
            content_type,
            template: json,
            variables,
            refreshable_tokens: refreshable,
        })
    }
}

fn header_auth_kind(lower_name: &str) -> AuthKind {
    match lower_name {
        "authorization" => AuthKind::Bearer,
        "x-api-key" => AuthKind::ApiKey,
        _ => AuthKind::Custom,
    }
}

fn infer_scalar_type(value: &str) -> String {
    if value.parse::<f64>().is_ok() {
        "number".to_string()
    } else if value == "true" || value == "false" {
        "bool".to_string()
    } else {
        "string".to_string()
    }
}

fn endpoint_id(method: &str, path: &str, operation_name: Option<&str>) -> String {
    if let Some(op) = operation_name {
        return format!("post-graphql-{}", slugify(op));
    }
    let slug_path = slugify(path.trim_start_matches('/'));
    format!("{}-{}", method.to_lowercase(), slug_path)
}

fn slugify(s: &str) -> String {
    let mut out = String::new();
    let mut last_was_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

fn response_shape(value: Option<&Value>) -> ResponseShape {
    match value {
        Some(Value::Array(_)) => ResponseShape { kind: ResponseShapeKind::Array, fields: None },
        Some(Value::Object(map)) => ResponseShape {
            kind: ResponseShapeKind::Object,
            fields: Some(map.keys().cloned().collect()),
        },
        Some(Value::String(_)) => ResponseShape { kind: ResponseShapeKind::String, fields: None },
        Some(Value::Number(_)) => ResponseShape { kind: ResponseShapeKind::Number, fields: None },
        Some(Value::Bool(_)) => ResponseShape { kind: ResponseShapeKind::Bool, fields: None },
        Some(Value::Null) | None => ResponseShape { kind: ResponseShapeKind::Null, fields: None },
    }
}

/// Build a recursive schema tree, capped at [`SCHEMA_DEPTH_CAP`] levels;
/// arrays are sampled by their first element.
fn build_schema(value: &Value, depth: usize) -> SchemaNode {
    if depth >= SCHEMA_DEPTH_CAP {
        return SchemaNode { kind: SchemaNodeKind::Null, fields: None, items: None, nullable: true };
    }

    match value {
        Value::Null => SchemaNode { kind: SchemaNodeKind::Null, fields: None, items: None, nullable: true },
        Value::Bool(_) => SchemaNode { kind: SchemaNodeKind::Bool, fields: None, items: None, nullable: false },
        Value::Number(_) => SchemaNode { kind: SchemaNodeKind::Number, fields: None, items: None, nullable: false },
        Value::String(_) => SchemaNode { kind: SchemaNodeKind::String, fields: None, items: None, nullable: false },
        Value::Array(items) => {
            let sample = items.first().map(|v| build_schema(v, depth + 1));
            SchemaNode {
                kind: SchemaNodeKind::Array,
                fields: None,
                items: sample.map(Box::new),
                nullable: false,
            }
        }
        Value::Object(map) => {
            let fields: BTreeMap<String, SchemaNode> =
                map.iter().map(|(k, v)| (k.clone(), build_schema(v, depth + 1))).collect();
            SchemaNode { kind: SchemaNodeKind::Object, fields: Some(fields), items: None, nullable: false }
        }
    }
}

/// Replace the value at a dotted JSON path (as produced by
/// [`token_analyzer::detect_refreshable_tokens`]) with `null`, marking
/// it as vault-supplied at replay time.
fn clear_path(value: &mut Value, path: &str) {
    let mut current = value;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let is_last = i == segments.len() - 1;
        let Some(obj) = current.as_object_mut() else { return };
        if is_last {
            obj.insert(segment.to_string(), Value::Null);
            return;
        }
        let Some(next) = obj.get_mut(*segment) else { return };
        current = next;
    }
}

fn to_model_pagination(matched: path_infer::PaginationMatch) -> PaginationDescriptor {
    PaginationDescriptor {
        kind: match matched.kind {
            PaginationKind::Offset => ModelPaginationKind::Offset,
            PaginationKind::Cursor => ModelPaginationKind::Cursor,
            PaginationKind::Page => ModelPaginationKind::Page,
        },
        param_name: matched.param_name,
        limit_param: matched.limit_param,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc as ChronoUtc;

    fn exchange(method: &str, url: &str, status: u16, body: &str) -> CapturedExchange {
        CapturedExchange {
            url: url.to_string(),
            method: method.to_string(),
            request_headers: vec![("authorization".to_string(), "Bearer aZ9kQ2mN7xP4rT8vW1yB5cD6eF3gH0jK".to_string())],
            request_body: None,
            status,
            response_headers: vec![("content-type".to_string(), "application/json".to_string())],
            response_body: body.as_bytes().to_vec(),
            content_type: Some("application/json".to_string()),
            timestamp: ChronoUtc::now(),
        }
    }

    #[test]
    fn first_observation_creates_endpoint_duplicates_increment() {
        let mut gen = SkillGenerator::new("api.example.com", "https://api.example.com");

        let first = gen.add_exchange(&exchange("GET", "https://api.example.com/items/1", 200, r#"{"id":1,"name":"a"}"#));
        assert!(first.is_some());

        let second = gen.add_exchange(&exchange("GET", "https://api.example.com/items/2", 200, r#"{"id":2,"name":"b"}"#));
        assert!(second.is_none());

        assert_eq!(gen.endpoints.len(), 1);
        let endpoint = gen.endpoints.values().next().unwrap();
        assert_eq!(endpoint.observation_count, 2);
        assert_eq!(endpoint.path, "/items/:id");
    }

    #[test]
    fn bearer_header_is_stored_and_extracted() {
        let mut gen = SkillGenerator::new("api.example.com", "https://api.example.com");
        let endpoint = gen
            .add_exchange(&exchange("GET", "https://api.example.com/items", 200, r#"{"id":1}"#))
            .unwrap();

        let auth_header = endpoint.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("authorization"));
        assert_eq!(auth_header.map(|(_, v)| v.as_str()), Some("[stored]"));
        assert_eq!(gen.get_extracted_auth().len(), 1);
    }

    #[test]
    fn response_shape_summarizes_object_fields() {
        let mut gen = SkillGenerator::new("api.example.com", "https://api.example.com");
        let endpoint = gen
            .add_exchange(&exchange("GET", "https://api.example.com/items", 200, r#"{"id":1,"name":"a"}"#))
            .unwrap();
        assert_eq!(endpoint.response_shape.kind, ResponseShapeKind::Object);
        assert_eq!(endpoint.response_shape.fields, Some(vec!["id".to_string(), "name".to_string()]));
    }

    #[test]
    fn to_skill_file_carries_metadata_counts() {
        let mut gen = SkillGenerator::new("api.example.com", "https://api.example.com");
        gen.add_exchange(&exchange("GET", "https://api.example.com/items", 200, r#"{"id":1}"#));
        gen.record_filtered();

        let skill = gen.to_skill_file("api.example.com");
        assert_eq!(skill.metadata.capture_count, 1);
        assert_eq!(skill.metadata.filtered_count, 1);
        assert_eq!(skill.endpoints.len(), 1);
    }
}
