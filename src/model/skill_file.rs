use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Endpoint;

/// The domain's captured-and-inferred artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillFile {
    pub version: String,
    pub domain: String,
    pub base_url: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    pub metadata: SkillMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthDescriptor>,
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// The schema-version stream this crate emits. Both `1.1` and `1.2` are
/// accepted on read as forward-compatible.
pub const CURRENT_VERSION: &str = "1.2";

/// Accumulator-level metadata recorded alongside the endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub capture_count: u64,
    pub filtered_count: u64,
    pub tool_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_cost: Option<BrowserCost>,
}

/// Resource cost of the browsing session this skill file was captured
/// from, compared against the tokens a replay would spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserCost {
    pub dom_bytes: u64,
    pub total_network_bytes: u64,
    pub total_requests: u64,
}

/// Authentication shape the domain requires, and how to refresh it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthDescriptor {
    pub browser_mode: bool,
    pub captcha_risk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_hint: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_config: Option<OAuthConfig>,
}

/// OAuth token-endpoint configuration detected during capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub grant_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// How a skill file's signature came to be, or didn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Locally captured and signed.
    #[serde(rename = "self")]
    SelfSigned,
    /// A foreign file whose signature was verified (if a key was present)
    /// and then stripped on import.
    Imported,
    /// Never signed.
    Unsigned,
}
