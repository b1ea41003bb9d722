//! In-process cache plus cache→disk→replay dispatch for a "browse this
//! URL" request.
//!
//! Discovery (guessing common API paths from an uncaptured site) and
//! generic HTML→markdown extraction are named collaborators outside
//! this crate's scope; when neither a cached nor a stored skill file
//! can answer the request, this façade returns guidance instead of
//! attempting either.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use url::Url;

use crate::dispatcher::RefreshDispatcher;
use crate::model::{Endpoint, ReplayTier, SkillFile};
use crate::replay::{self, ReplayOptions};
use crate::skill_store::SkillStore;
use crate::vault::Vault;

/// One cached replay result, keyed by `domain::endpoint_id`.
#[derive(Debug, Clone)]
struct CacheEntry {
    data: serde_json::Value,
    status: u16,
    endpoint_id: String,
    captured_at: DateTime<Utc>,
    truncated: bool,
}

/// A successful `browse` outcome.
#[derive(Debug, Clone)]
pub struct BrowseSuccess {
    pub data: serde_json::Value,
    pub status: u16,
    pub domain: String,
    pub endpoint_id: String,
    pub tier: ReplayTier,
    pub from_cache: bool,
    pub captured_at: DateTime<Utc>,
    pub truncated: bool,
}

/// A guidance outcome: there is nothing to replay, so the caller is
/// told why and what to do next.
#[derive(Debug, Clone)]
pub struct BrowseGuidance {
    pub reason: String,
    pub suggestion: String,
    pub domain: String,
    pub url: String,
}

/// Either a replay succeeded, or the caller gets guidance on what to
/// do next (capture, re-capture, or fall back to the DOM).
pub type BrowseOutcome = Result<BrowseSuccess, BrowseGuidance>;

/// Options for [`Orchestrator::browse`].
#[derive(Debug, Clone, Default)]
pub struct BrowseOptions {
    pub params: HashMap<String, String>,
    pub fresh: bool,
    pub max_bytes: Option<usize>,
}

/// Composes the capture→replay pipeline for an agent's "browse this
/// URL" request. The in-memory cache is owned by this struct, not a
/// process-global, so tests can inject an independent instance.
pub struct Orchestrator {
    store: SkillStore,
    vault: Vault,
    dispatcher: RefreshDispatcher,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl Orchestrator {
    pub fn new(store: SkillStore, vault: Vault, dispatcher: RefreshDispatcher) -> Self {
        Self {
            store,
            vault,
            dispatcher,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `url` against a captured skill file and replay the best
    /// matching endpoint, or return guidance when none is available.
    pub async fn browse(&self, url: &str, options: BrowseOptions) -> BrowseOutcome {
        let parsed = Url::parse(url).map_err(|err| BrowseGuidance {
            reason: format!("unparseable URL: {err}"),
            suggestion: "pass a valid absolute http(s) URL".to_string(),
            domain: String::new(),
            url: url.to_string(),
        })?;
        let domain = parsed.host_str().unwrap_or_default().to_string();
        let request_path = parsed.path().to_string();

        if let Some(hit) = self.lookup_cache(&domain, &request_path).await {
            tracing::debug!(domain = %domain, "browse cache hit");
            return Ok(BrowseSuccess {
                data: hit.data,
                status: hit.status,
                domain,
                endpoint_id: hit.endpoint_id,
                tier: ReplayTier::Unknown,
                from_cache: true,
                captured_at: hit.captured_at,
                truncated: hit.truncated,
            });
        }

        let skill = match self.store.load(&domain, None) {
            Ok(skill) => skill,
            Err(_) => {
                return Err(BrowseGuidance {
                    reason: format!("no skill file captured for {domain}"),
                    suggestion: "capture this domain first, or surface the page's DOM to the user".to_string(),
                    domain,
                    url: url.to_string(),
                })
            }
        };

        let endpoint = match select_endpoint(&skill, &request_path) {
            Some(endpoint) => endpoint,
            None => {
                return Err(BrowseGuidance {
                    reason: format!("no replayable GET endpoint matches path {request_path}"),
                    suggestion: "re-capture this path, or surface the page's DOM to the user".to_string(),
                    domain,
                    url: url.to_string(),
                })
            }
        };

        let replay_options = ReplayOptions {
            params: options.params,
            fresh: options.fresh,
            max_bytes: options.max_bytes,
            timeout: None,
            skip_ssrf_check: false,
        };

        let result = replay::replay(&skill, &endpoint.id, &replay_options, Some(&self.vault), Some(&self.dispatcher))
            .await
            .map_err(|err| BrowseGuidance {
                reason: err.to_string(),
                suggestion: "re-capture this endpoint if the origin's contract has changed".to_string(),
                domain: domain.clone(),
                url: url.to_string(),
            })?;

        let content_type = result
            .headers
            .get("content-type")
            .cloned()
            .unwrap_or_default();
        if content_type.contains("text/html") {
            return Err(BrowseGuidance {
                reason: "non_api_response".to_string(),
                suggestion: "this endpoint returned HTML, not JSON; fall back to DOM extraction".to_string(),
                domain,
                url: url.to_string(),
            });
        }

        let captured_at = skill.captured_at;
        self.insert_cache(
            &domain,
            &request_path,
            CacheEntry {
                data: result.data.clone(),
                status: result.status,
                endpoint_id: endpoint.id.clone(),
                captured_at,
                truncated: result.truncated,
            },
        )
        .await;

        Ok(BrowseSuccess {
            data: result.data,
            status: result.status,
            domain,
            endpoint_id: endpoint.id.clone(),
            tier: endpoint
                .replayability
                .as_ref()
                .map(|r| r.tier)
                .unwrap_or(ReplayTier::Unknown),
            from_cache: false,
            captured_at,
            truncated: result.truncated,
        })
    }

    async fn lookup_cache(&self, domain: &str, path: &str) -> Option<CacheEntry> {
        let key = cache_key(domain, path);
        self.cache.read().await.get(&key).cloned()
    }

    async fn insert_cache(&self, domain: &str, request_path: &str, entry: CacheEntry) {
        self.cache.write().await.insert(cache_key(domain, request_path), entry);
    }
}

fn cache_key(domain: &str, request_path: &str) -> String {
    format!("{domain}::{request_path}")
}

/// Prefer a GET endpoint whose tier is green, yellow, or unknown (i.e.
/// not known-broken) and whose parameterized path overlaps the
/// requested path.
fn select_endpoint<'a>(skill: &'a SkillFile, request_path: &str) -> Option<&'a Endpoint> {
    let parameterized = crate::path_infer::parameterize_path(request_path);

    skill
        .endpoints
        .iter()
        .filter(|e| e.method.eq_ignore_ascii_case("GET"))
        .filter(|e| {
            matches!(
                e.replayability.as_ref().map(|r| r.tier),
                None | Some(ReplayTier::Green) | Some(ReplayTier::Yellow) | Some(ReplayTier::Unknown)
            )
        })
        .find(|e| e.path == parameterized || e.path == request_path || paths_overlap(&e.path, request_path))
}

fn paths_overlap(endpoint_path: &str, request_path: &str) -> bool {
    let endpoint_segments: Vec<&str> = endpoint_path.split('/').filter(|s| !s.is_empty()).collect();
    let request_segments: Vec<&str> = request_path.split('/').filter(|s| !s.is_empty()).collect();
    if endpoint_segments.len() != request_segments.len() {
        return false;
    }
    endpoint_segments
        .iter()
        .zip(request_segments.iter())
        .all(|(e, r)| e.starts_with(':') || e == r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResponseShape, ResponseShapeKind};

    fn sample_endpoint(method: &str, path: &str) -> Endpoint {
        Endpoint {
            id: format!("{}-{}", method.to_lowercase(), path.replace('/', "-")),
            method: method.to_string(),
            path: path.to_string(),
            operation_name: None,
            query_params: vec![],
            headers: vec![],
            response_shape: ResponseShape {
                kind: ResponseShapeKind::Object,
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
        }
    }

    fn sample_skill(endpoints: Vec<Endpoint>) -> SkillFile {
        SkillFile {
            version: "1.2".to_string(),
            domain: "api.example.com".to_string(),
            base_url: "https://api.example.com".to_string(),
            captured_at: Utc::now(),
            endpoints,
            metadata: crate::model::SkillMetadata {
                capture_count: 1,
                filtered_count: 0,
                tool_version: "test".to_string(),
                browser_cost: None,
            },
            auth: None,
            provenance: crate::model::Provenance::Unsigned,
            signature: None,
        }
    }

    #[test]
    fn select_endpoint_matches_parameterized_path() {
        let skill = sample_skill(vec![sample_endpoint("GET", "/users/:id")]);
        let matched = select_endpoint(&skill, "/users/42");
        assert!(matched.is_some());
        assert_eq!(matched.unwrap().path, "/users/:id");
    }

    #[test]
    fn select_endpoint_ignores_post_endpoints() {
        let skill = sample_skill(vec![sample_endpoint("POST", "/users/:id")]);
        assert!(select_endpoint(&skill, "/users/42").is_none());
    }

    #[test]
    fn paths_overlap_requires_equal_segment_count() {
        assert!(paths_overlap("/users/:id", "/users/42"));
        assert!(!paths_overlap("/users/:id", "/users/42/posts"));
        assert!(!paths_overlap("/users/:id", "/users"));
    }
}
