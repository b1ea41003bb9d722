//! Encrypted, file-backed credential store.
//!
//! One file (`auth.enc`) holds `{salt, iv, ciphertext, tag}`; the
//! plaintext is a JSON map `domain -> StoredAuth`, encrypted with
//! AES-256-GCM under a key derived by PBKDF2-HMAC-SHA512 from the machine
//! identifier and a per-install random salt. Decryption failures (wrong
//! key, corrupt file, missing file) all collapse to `None` rather than an
//! error, so a caller can never distinguish "wrong key" from "not found".

use std::collections::HashMap;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model::{AuthKind, StoredAuth, StoredSession, StoredToken};

const PBKDF2_ROUNDS: u32 = 100_000;
// 96-bit nonce, the standard AES-GCM width the `aes-gcm` crate is built around.
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const SALT_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct VaultFile {
    salt: String,
    iv: String,
    ciphertext: String,
    tag: String,
}

/// Encrypted credential store for one process. Writes are serialized
/// through the single handle held by the owner; callers should not
/// construct more than one `Vault` per `auth.enc` file within a process.
pub struct Vault {
    config: Config,
}

impl Vault {
    /// Open the vault backed by `config`'s `auth_file()`.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Store (overwrite) the credential for `domain`.
    pub fn store(&self, domain: &str, auth: StoredAuth) -> crate::Result<()> {
        let mut map = self.load_map().unwrap_or_default();
        map.insert(domain.to_string(), auth);
        self.save_map(&map)
    }

    /// Retrieve the credential for `domain`, or `None` if absent or the
    /// file could not be decrypted.
    pub fn retrieve(&self, domain: &str) -> Option<StoredAuth> {
        self.load_map().ok()?.remove(domain)
    }

    /// Whether a credential is stored for `domain`.
    pub fn has(&self, domain: &str) -> bool {
        self.load_map()
            .map(|map| map.contains_key(domain))
            .unwrap_or(false)
    }

    /// All domains with a stored credential.
    pub fn list_domains(&self) -> Vec<String> {
        self.load_map()
            .map(|map| map.into_keys().collect())
            .unwrap_or_default()
    }

    /// Remove the credential for `domain`, if any.
    pub fn clear(&self, domain: &str) -> crate::Result<()> {
        let mut map = self.load_map().unwrap_or_default();
        map.remove(domain);
        self.save_map(&map)
    }

    /// Merge refreshable session tokens into `domain`'s stored auth,
    /// preserving every sibling field.
    pub fn store_tokens(
        &self,
        domain: &str,
        tokens: HashMap<String, StoredToken>,
    ) -> crate::Result<()> {
        let mut map = self.load_map().unwrap_or_default();
        let entry = map.entry(domain.to_string()).or_insert_with(empty_auth);
        for (name, token) in tokens {
            entry.session_tokens.insert(name, token);
        }
        self.save_map(&map)
    }

    /// Retrieve `domain`'s session tokens, if a credential is stored.
    pub fn retrieve_tokens(&self, domain: &str) -> Option<HashMap<String, StoredToken>> {
        self.load_map().ok()?.get(domain).map(|a| a.session_tokens.clone())
    }

    /// Store a cached browser session (cookie jar).
    pub fn store_session(&self, domain: &str, session: StoredSession) -> crate::Result<()> {
        let mut map = self.load_map().unwrap_or_default();
        let entry = map.entry(domain.to_string()).or_insert_with(empty_auth);
        entry.session = Some(session);
        self.save_map(&map)
    }

    /// Retrieve `domain`'s cached session, if any.
    pub fn retrieve_session(&self, domain: &str) -> Option<StoredSession> {
        self.load_map().ok()?.get(domain)?.session.clone()
    }

    /// Retrieve a session for `domain`, falling back to each
    /// registrable-domain suffix (dropping one label at a time, stopping
    /// at two labels) so `dashboard.x.tv` can reuse an `x.tv` session.
    pub fn retrieve_session_with_fallback(&self, domain: &str) -> Option<StoredSession> {
        let map = self.load_map().ok()?;
        for candidate in domain_suffixes(domain) {
            if let Some(auth) = map.get(&candidate) {
                if let Some(session) = &auth.session {
                    return Some(session.clone());
                }
            }
        }
        None
    }

    /// Store OAuth refresh token / client secret, preserving sibling
    /// fields.
    pub fn store_oauth_credentials(
        &self,
        domain: &str,
        refresh_token: Option<String>,
        client_secret: Option<String>,
    ) -> crate::Result<()> {
        let mut map = self.load_map().unwrap_or_default();
        let entry = map.entry(domain.to_string()).or_insert_with(empty_auth);
        if refresh_token.is_some() {
            entry.oauth_refresh_token = refresh_token;
        }
        if client_secret.is_some() {
            entry.oauth_client_secret = client_secret;
        }
        self.save_map(&map)
    }

    /// Retrieve `domain`'s OAuth refresh token / client secret.
    pub fn retrieve_oauth_credentials(&self, domain: &str) -> Option<(Option<String>, Option<String>)> {
        let auth = self.load_map().ok()?.remove(domain)?;
        Some((auth.oauth_refresh_token, auth.oauth_client_secret))
    }

    fn load_map(&self) -> crate::Result<HashMap<String, StoredAuth>> {
        let path = self.config.auth_file();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&path)?;
        let file: VaultFile =
            serde_json::from_str(&content).map_err(|e| crate::Error::Crypto(e.to_string()))?;
        decrypt(&file, self.machine_id()?.as_bytes())
    }

    fn save_map(&self, map: &HashMap<String, StoredAuth>) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config.base_dir)?;
        let salt = self.ensure_salt()?;
        let file = encrypt(map, self.machine_id()?.as_bytes(), &salt)?;
        let content = serde_json::to_string_pretty(&file)?;
        let path = self.config.auth_file();
        std::fs::write(&path, content)?;
        enforce_owner_only(&path)?;
        Ok(())
    }

    fn ensure_salt(&self) -> crate::Result<[u8; SALT_LEN]> {
        let path = self.config.install_salt_file();
        if let Ok(existing) = std::fs::read(&path) {
            if existing.len() == SALT_LEN {
                let mut salt = [0u8; SALT_LEN];
                salt.copy_from_slice(&existing);
                return Ok(salt);
            }
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        std::fs::create_dir_all(&self.config.base_dir)?;
        std::fs::write(&path, salt)?;
        enforce_owner_only(&path)?;
        Ok(salt)
    }

    fn machine_id(&self) -> crate::Result<String> {
        if let Some(id) = &self.config.machine_id_override {
            return Ok(id.clone());
        }
        Ok(read_machine_id())
    }
}

fn empty_auth() -> StoredAuth {
    StoredAuth {
        kind: AuthKind::Custom,
        header_name: String::new(),
        header_value: String::new(),
        session_tokens: HashMap::new(),
        session: None,
        oauth_refresh_token: None,
        oauth_client_secret: None,
    }
}

/// Suffixes of `domain`, dropping one label at a time, stopping at two
/// labels (`example.com`, not `com`).
fn domain_suffixes(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    let mut out = Vec::new();
    for start in 0..labels.len() {
        let remaining = labels.len() - start;
        if remaining < 2 {
            break;
        }
        out.push(labels[start..].join("."));
    }
    out
}

fn derive_key(machine_id: &[u8], salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha512>(machine_id, salt, PBKDF2_ROUNDS, &mut key);
    key
}

fn encrypt(
    map: &HashMap<String, StoredAuth>,
    machine_id: &[u8],
    salt: &[u8; SALT_LEN],
) -> crate::Result<VaultFile> {
    let key_bytes = derive_key(machine_id, salt);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);

    let mut iv = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    let plaintext = serde_json::to_vec(map)?;
    let mut sealed = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| crate::Error::Crypto(e.to_string()))?;
    let tag = sealed.split_off(sealed.len() - TAG_LEN);

    Ok(VaultFile {
        salt: hex::encode(salt),
        iv: hex::encode(iv),
        ciphertext: hex::encode(sealed),
        tag: hex::encode(tag),
    })
}

fn decrypt(file: &VaultFile, machine_id: &[u8]) -> crate::Result<HashMap<String, StoredAuth>> {
    let decode = |s: &str| hex::decode(s).map_err(|e| crate::Error::Crypto(e.to_string()));

    let salt = decode(&file.salt)?;
    let iv = decode(&file.iv)?;
    let mut combined = decode(&file.ciphertext)?;
    combined.extend(decode(&file.tag)?);

    let key_bytes = derive_key(machine_id, &salt);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(&iv);

    let plaintext = cipher
        .decrypt(nonce, combined.as_ref())
        .map_err(|e| crate::Error::Crypto(e.to_string()))?;

    serde_json::from_slice(&plaintext).map_err(|e| crate::Error::Crypto(e.to_string()))
}

/// Read the OS machine identifier, falling back to hostname + home
/// directory when `/etc/machine-id` is unavailable.
fn read_machine_id() -> String {
    if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
        let trimmed = id.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let home = dirs::home_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    format!("{host}:{home}")
}

#[cfg(unix)]
fn enforce_owner_only(path: &Path) -> crate::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn enforce_owner_only(_path: &Path) -> crate::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bearer_auth(value: &str) -> StoredAuth {
        StoredAuth {
            kind: AuthKind::Bearer,
            header_name: "authorization".to_string(),
            header_value: value.to_string(),
            session_tokens: HashMap::new(),
            session: None,
            oauth_refresh_token: None,
            oauth_client_secret: None,
        }
    }

    fn vault_in(dir: &std::path::Path) -> Vault {
        let config = Config::from_env().with_base_dir(dir);
        Vault::new(config)
    }

    #[test]
    fn store_then_retrieve_roundtrips() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());

        vault
            .store("api.example.com", bearer_auth("Bearer abc123"))
            .unwrap();

        let loaded = vault.retrieve("api.example.com").unwrap();
        assert_eq!(loaded.header_value, "Bearer abc123");
        assert!(!vault.has("other.example.com"));
    }

    #[test]
    fn retrieve_missing_domain_is_none_not_error() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        assert!(vault.retrieve("nothing.example.com").is_none());
    }

    #[test]
    fn wrong_key_yields_none_not_error() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        vault.store("api.example.com", bearer_auth("Bearer abc")).unwrap();

        let mut other_config = Config::from_env().with_base_dir(dir.path());
        other_config.machine_id_override = Some("a-different-machine".to_string());
        let other_vault = Vault::new(other_config);

        assert!(other_vault.retrieve("api.example.com").is_none());
    }

    #[test]
    fn file_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        vault.store("api.example.com", bearer_auth("Bearer abc")).unwrap();

        let mode = std::fs::metadata(vault.config.auth_file()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn store_tokens_preserves_sibling_fields() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        vault.store("api.example.com", bearer_auth("Bearer abc")).unwrap();

        let mut tokens = HashMap::new();
        tokens.insert(
            "csrf".to_string(),
            StoredToken {
                value: "deadbeef".to_string(),
                refreshed_at: Utc::now(),
                expires_at: None,
            },
        );
        vault.store_tokens("api.example.com", tokens).unwrap();

        let reloaded = vault.retrieve("api.example.com").unwrap();
        assert_eq!(reloaded.header_value, "Bearer abc");
        assert!(reloaded.session_tokens.contains_key("csrf"));
    }

    #[test]
    fn session_fallback_drops_one_label_at_a_time() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        let session = StoredSession {
            cookies: HashMap::from([("sid".to_string(), "abc".to_string())]),
            saved_at: Utc::now(),
            max_age_secs: None,
        };
        vault.store_session("x.tv", session).unwrap();

        let fallback = vault.retrieve_session_with_fallback("dashboard.x.tv");
        assert!(fallback.is_some());

        // Stops at two labels: no fallback to a bare TLD.
        assert!(domain_suffixes("dashboard.x.tv").iter().all(|s| s.contains('.')));
    }

    #[test]
    fn clear_removes_domain() {
        let dir = tempdir().unwrap();
        let vault = vault_in(dir.path());
        vault.store("api.example.com", bearer_auth("Bearer abc")).unwrap();
        vault.clear("api.example.com").unwrap();
        assert!(vault.retrieve("api.example.com").is_none());
    }
}
