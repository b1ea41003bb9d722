//! Process-wide, per-domain at-most-once refresh coordinator.
//! Concurrent replays against the same domain that hit a 401 share one
//! outbound refresh instead of each starting their own.

use std::collections::HashMap;

use tokio::sync::{watch, Mutex};

use crate::model::OAuthConfig;
use crate::oauth_refresh;
use crate::vault::Vault;

/// Result of a coordinated refresh, shared by every waiter for a
/// domain.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub success: bool,
    pub oauth_refreshed: bool,
    pub token_rotated: bool,
    pub detail: Option<String>,
}

/// Per-domain in-flight refresh coordinator. Construct one per process,
/// or inject an explicit instance in tests.
pub struct RefreshDispatcher {
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<DispatchResult>>>>,
}

impl Default for RefreshDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshDispatcher {
    pub fn new() -> Self {
        Self { in_flight: Mutex::new(HashMap::new()) }
    }

    /// Refresh `domain`'s credential, joining an in-flight refresh if
    /// one is already running. `oauth_config` is `None` when the
    /// domain has no OAuth endpoint on record, in which case refresh is
    /// not possible here (a browser-assisted, captcha-aware refresh is
    /// a collaborator outside this crate's scope).
    pub async fn refresh(&self, domain: &str, oauth_config: Option<&OAuthConfig>, vault: &Vault) -> DispatchResult {
        let mut map = self.in_flight.lock().await;
        if let Some(existing) = map.get(domain).cloned() {
            drop(map);
            return Self::await_existing(existing).await;
        }

        let (tx, rx) = watch::channel(None);
        map.insert(domain.to_string(), rx);
        drop(map);

        let outcome = Self::perform_refresh(domain, oauth_config, vault).await;
        let _ = tx.send(Some(outcome.clone()));

        self.in_flight.lock().await.remove(domain);
        outcome
    }

    async fn await_existing(mut rx: watch::Receiver<Option<DispatchResult>>) -> DispatchResult {
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return DispatchResult {
                    success: false,
                    oauth_refreshed: false,
                    token_rotated: false,
                    detail: Some("in-flight refresh was dropped before completing".to_string()),
                };
            }
        }
    }

    async fn perform_refresh(domain: &str, oauth_config: Option<&OAuthConfig>, vault: &Vault) -> DispatchResult {
        let Some(cfg) = oauth_config else {
            return DispatchResult {
                success: false,
                oauth_refreshed: false,
                token_rotated: false,
                detail: Some("no OAuth config on record for this domain".to_string()),
            };
        };

        match oauth_refresh::refresh_oauth(domain, cfg, vault).await {
            Ok(result) => DispatchResult {
                success: true,
                oauth_refreshed: true,
                token_rotated: result.token_rotated,
                detail: None,
            },
            Err(err) => DispatchResult {
                success: false,
                oauth_refreshed: true,
                token_rotated: false,
                detail: Some(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_oauth_config_fails_without_network_call() {
        let dir = tempdir().unwrap();
        let config = Config::from_env().with_base_dir(dir.path());
        let vault = Vault::new(config);
        let dispatcher = RefreshDispatcher::new();

        let result = dispatcher.refresh("api.example.com", None, &vault).await;
        assert!(!result.success);
        assert!(!result.oauth_refreshed);
    }

    #[tokio::test]
    async fn concurrent_refreshes_for_different_domains_are_independent() {
        let dir = tempdir().unwrap();
        let config = Config::from_env().with_base_dir(dir.path());
        let vault = Vault::new(config);
        let dispatcher = Arc::new(RefreshDispatcher::new());

        let d1 = dispatcher.clone();
        let d2 = dispatcher.clone();
        let (r1, r2) = tokio::join!(
            d1.refresh("a.example.com", None, &vault),
            d2.refresh("b.example.com", None, &vault)
        );

        assert!(!r1.success);
        assert!(!r2.success);
    }
}
