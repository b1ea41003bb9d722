//! Exchange a stored refresh token (or client credentials) for a fresh
//! access token against a whitelisted or domain-matched token endpoint.

use std::time::Duration;

use url::Url;

use crate::capture_filter::is_domain_match;
use crate::model::{OAuthConfig, StoredAuth};
use crate::url_safety;
use crate::vault::Vault;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Well-known OAuth token-endpoint hosts trusted even when they don't
/// match the skill's own domain.
const WHITELISTED_HOSTS: &[&str] = &[
    "google.com",
    "accounts.google.com",
    "microsoft.com",
    "login.microsoftonline.com",
    "github.com",
    "reddit.com",
    "twitter.com",
    "x.com",
    "auth0.com",
    "okta.com",
    "firebase.google.com",
];

/// Outcome of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResult {
    /// Whether the server rotated the refresh token.
    pub token_rotated: bool,
}

/// Refresh `domain`'s OAuth credential in the vault against
/// `oauth_config`'s token endpoint.
pub async fn refresh_oauth(domain: &str, oauth_config: &OAuthConfig, vault: &Vault) -> crate::Result<RefreshResult> {
    let (refresh_token, client_secret) = vault
        .retrieve_oauth_credentials(domain)
        .unwrap_or((None, None));

    if oauth_config.grant_type == "refresh_token" && refresh_token.is_none() {
        return Err(crate::Error::InvalidAuth(format!(
            "no stored refresh token for {domain}"
        )));
    }

    let mut form: Vec<(&str, String)> = vec![
        ("grant_type", oauth_config.grant_type.clone()),
        ("client_id", oauth_config.client_id.clone()),
    ];
    if let Some(scope) = &oauth_config.scope {
        form.push(("scope", scope.clone()));
    }
    if let Some(token) = &refresh_token {
        form.push(("refresh_token", token.clone()));
    }
    if let Some(secret) = &client_secret {
        form.push(("client_secret", secret.clone()));
    }

    let verdict = url_safety::resolve_and_validate(&oauth_config.token_endpoint).await;
    if !verdict.safe {
        return Err(crate::Error::Ssrf(format!(
            "unsafe OAuth token endpoint: {}",
            verdict.reason.unwrap_or_default()
        )));
    }

    let endpoint_host = Url::parse(&oauth_config.token_endpoint)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| crate::Error::InvalidInput("token endpoint has no host".to_string()))?;

    let domain_matches = is_domain_match(&endpoint_host, domain)
        || WHITELISTED_HOSTS.iter().any(|host| is_domain_match(&endpoint_host, host));
    if !domain_matches {
        return Err(crate::Error::Ssrf(format!(
            "OAuth token endpoint host '{endpoint_host}' does not match domain '{domain}' or any whitelisted host"
        )));
    }

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(crate::Error::Http)?;

    let response = client
        .post(&oauth_config.token_endpoint)
        .form(&form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(crate::Error::Server { status: status.as_u16(), message: body });
    }

    let body: serde_json::Value = response.json().await?;
    let access_token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::Error::InvalidAuth("token response missing access_token".to_string()))?;

    let mut stored = vault.retrieve(domain).unwrap_or_else(|| empty_bearer_auth());
    stored.header_value = format!("Bearer {access_token}");

    let new_refresh_token = body.get("refresh_token").and_then(|v| v.as_str()).map(str::to_string);
    let token_rotated = match (&new_refresh_token, &refresh_token) {
        (Some(new), Some(old)) => new != old,
        (Some(_), None) => true,
        _ => false,
    };
    if token_rotated {
        stored.oauth_refresh_token = new_refresh_token;
    }

    vault.store(domain, stored)?;

    Ok(RefreshResult { token_rotated })
}

fn empty_bearer_auth() -> StoredAuth {
    StoredAuth {
        kind: crate::model::AuthKind::Bearer,
        header_name: "authorization".to_string(),
        header_value: String::new(),
        session_tokens: std::collections::HashMap::new(),
        session: None,
        oauth_refresh_token: None,
        oauth_client_secret: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_dot_prefix_rule_rejects_lookalike_domains() {
        assert!(!is_domain_match("evil-auth0.com", "auth0.com"));
        assert!(is_domain_match("login.auth0.com", "auth0.com"));
    }

    #[test]
    fn whitelisted_hosts_cover_major_providers() {
        assert!(WHITELISTED_HOSTS.contains(&"github.com"));
        assert!(WHITELISTED_HOSTS.contains(&"okta.com"));
    }
}
