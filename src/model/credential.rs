use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored credential for a single domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAuth {
    #[serde(rename = "type")]
    pub kind: AuthKind,
    pub header_name: String,
    pub header_value: String,
    #[serde(default)]
    pub session_tokens: HashMap<String, StoredToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<StoredSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_client_secret: Option<String>,
}

/// The kind of credential material stored for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    Bearer,
    ApiKey,
    Cookie,
    Custom,
}

/// A refreshable session token (CSRF, nonce, ...) value plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub value: String,
    pub refreshed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A cached browser session (cookie jar) and when it was saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub cookies: HashMap<String, String>,
    pub saved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,
}

impl StoredAuth {
    /// Merge another capture's extracted fields into this one, never
    /// blindly overwriting sibling fields.
    pub fn merge(&mut self, other: StoredAuth) {
        self.kind = other.kind;
        self.header_name = other.header_name;
        self.header_value = other.header_value;
        for (name, token) in other.session_tokens {
            self.session_tokens.insert(name, token);
        }
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.oauth_refresh_token.is_some() {
            self.oauth_refresh_token = other.oauth_refresh_token;
        }
        if other.oauth_client_secret.is_some() {
            self.oauth_client_secret = other.oauth_client_secret;
        }
    }
}
