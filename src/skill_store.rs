//! Canonicalization, HMAC signing, and on-disk storage of skill files.

use std::sync::LazyLock;

use hmac::{Hmac, Mac};
use regex::Regex;
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::model::{Provenance, SkillFile};
use crate::url_safety;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "hmac-sha256:";

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

/// Reject domain names that would otherwise validate against
/// [`DOMAIN_RE`] but still carry directory-traversal semantics
/// (`a..b`, `a/b`).
fn validate_domain(domain: &str) -> crate::Result<()> {
    if domain.is_empty() || domain.contains("..") || domain.contains('/') || domain.contains('\\') {
        return Err(crate::Error::InvalidDomain(domain.to_string()));
    }
    if !DOMAIN_RE.is_match(domain) {
        return Err(crate::Error::InvalidDomain(domain.to_string()));
    }
    Ok(())
}

/// Serialize `skill` with `signature` and `provenance` removed and
/// object keys sorted lexicographically at every level, in a
/// deterministic byte form independent of struct field order.
pub fn canonicalize(skill: &SkillFile) -> crate::Result<String> {
    let mut value = serde_json::to_value(skill)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("signature");
        obj.remove("provenance");
    }
    Ok(canonical_json(&value))
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).expect("string serialization cannot fail"),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .iter()
                .map(|k| {
                    let key = serde_json::to_string(k).expect("string serialization cannot fail");
                    format!("{key}:{}", canonical_json(&map[*k]))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

/// Sign `skill` under `key`, returning `hmac-sha256:<hex>`.
pub fn sign(skill: &SkillFile, key: &[u8]) -> crate::Result<String> {
    let canonical = canonicalize(skill)?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| crate::Error::Crypto(e.to_string()))?;
    mac.update(canonical.as_bytes());
    let tag = mac.finalize().into_bytes();
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(tag)))
}

/// Verify `signature` against `skill` under `key`, in constant time.
pub fn verify(skill: &SkillFile, signature: &str, key: &[u8]) -> crate::Result<bool> {
    let Some(hex_tag) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return Ok(false);
    };
    let Ok(given_tag) = hex::decode(hex_tag) else {
        return Ok(false);
    };

    let canonical = canonicalize(skill)?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| crate::Error::Crypto(e.to_string()))?;
    mac.update(canonical.as_bytes());
    let expected_tag = mac.finalize().into_bytes();

    Ok(bool::from(expected_tag.as_slice().ct_eq(&given_tag)))
}

/// Signs and persists skill files to `<skills_dir>/<domain>.json`, and
/// verifies them on read.
pub struct SkillStore {
    config: Config,
}

impl SkillStore {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Path for `domain`'s skill file, after validating the domain
    /// against path-traversal at the boundary rather than relying on
    /// the filesystem to reject it.
    pub fn path_for(&self, domain: &str) -> crate::Result<std::path::PathBuf> {
        validate_domain(domain)?;
        Ok(self.config.skills_dir.join(format!("{domain}.json")))
    }

    /// Load or create the local HMAC signing key.
    pub fn signing_key(&self) -> crate::Result<Vec<u8>> {
        let path = self.config.signing_key_file();
        if let Ok(existing) = std::fs::read(&path) {
            if !existing.is_empty() {
                return Ok(existing);
            }
        }

        use rand::RngCore;
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        std::fs::create_dir_all(&self.config.base_dir)?;
        std::fs::write(&path, &key)?;
        enforce_owner_only(&path)?;
        Ok(key)
    }

    /// Sign and store `skill`, self-signed, creating the skills
    /// directory and the sibling `.gitignore` on first use.
    pub fn store(&self, mut skill: SkillFile) -> crate::Result<SkillFile> {
        validate_domain(&skill.domain)?;
        if !url_safety::validate(&skill.base_url).safe {
            return Err(crate::Error::Ssrf(format!("unsafe baseUrl: {}", skill.base_url)));
        }
        for endpoint in &skill.endpoints {
            if !url_safety::validate(&endpoint.example_url).safe {
                return Err(crate::Error::Ssrf(format!("unsafe example URL: {}", endpoint.example_url)));
            }
        }

        let key = self.signing_key()?;
        skill.provenance = Provenance::SelfSigned;
        skill.signature = Some(sign(&skill, &key)?);

        self.write_file(&skill)?;
        self.ensure_gitignore()?;
        Ok(skill)
    }

    /// Load `domain`'s skill file. SSRF-revalidates every URL. When
    /// `key` is `Some`, rejects a non-`imported` file whose signature
    /// is missing or invalid.
    pub fn load(&self, domain: &str, key: Option<&[u8]>) -> crate::Result<SkillFile> {
        let path = self.path_for(domain)?;
        let content = std::fs::read_to_string(&path)?;
        let skill: SkillFile = serde_json::from_str(&content)?;

        if !url_safety::validate(&skill.base_url).safe {
            return Err(crate::Error::Ssrf(format!("unsafe baseUrl: {}", skill.base_url)));
        }
        for endpoint in &skill.endpoints {
            if !url_safety::validate(&endpoint.example_url).safe {
                return Err(crate::Error::Ssrf(format!("unsafe example URL: {}", endpoint.example_url)));
            }
        }

        if let Some(key) = key {
            if skill.provenance != Provenance::Imported {
                match &skill.signature {
                    Some(sig) if verify(&skill, sig, key)? => {}
                    _ => return Err(crate::Error::Signature(format!("invalid or missing signature for {domain}"))),
                }
            }
        }

        Ok(skill)
    }

    /// List every domain with a stored skill file.
    pub fn list_domains(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.config.skills_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.path().file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect()
    }

    /// Import a foreign skill file: parse, SSRF-validate every URL,
    /// verify the signature if a local key is present (rejecting on
    /// failure), strip the foreign signature, mark `imported`, and
    /// persist.
    pub fn import(&self, raw_json: &str, local_key: Option<&[u8]>) -> crate::Result<SkillFile> {
        let mut skill: SkillFile = serde_json::from_str(raw_json)?;
        validate_domain(&skill.domain)?;

        if !url_safety::validate(&skill.base_url).safe {
            return Err(crate::Error::Ssrf(format!("unsafe baseUrl: {}", skill.base_url)));
        }
        for endpoint in &skill.endpoints {
            if !url_safety::validate(&endpoint.example_url).safe {
                return Err(crate::Error::Ssrf(format!("unsafe example URL: {}", endpoint.example_url)));
            }
        }

        if let (Some(key), Some(sig)) = (local_key, skill.signature.clone()) {
            if !verify(&skill, &sig, key)? {
                return Err(crate::Error::Signature("foreign signature failed verification".to_string()));
            }
        }

        skill.signature = None;
        skill.provenance = Provenance::Imported;
        self.write_file(&skill)?;
        self.ensure_gitignore()?;
        Ok(skill)
    }

    fn write_file(&self, skill: &SkillFile) -> crate::Result<()> {
        std::fs::create_dir_all(&self.config.skills_dir)?;
        let path = self.path_for(&skill.domain)?;
        let content = serde_json::to_string_pretty(skill)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn ensure_gitignore(&self) -> crate::Result<()> {
        let path = self.config.base_dir.join(".gitignore");
        if path.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.config.base_dir)?;
        std::fs::write(&path, "auth.enc\n*.key\n")?;
        Ok(())
    }
}

#[cfg(unix)]
fn enforce_owner_only(path: &std::path::Path) -> crate::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn enforce_owner_only(_path: &std::path::Path) -> crate::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SkillMetadata;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_skill(domain: &str) -> SkillFile {
        SkillFile {
            version: crate::model::CURRENT_VERSION.to_string(),
            domain: domain.to_string(),
            base_url: format!("https://{domain}"),
            captured_at: Utc::now(),
            endpoints: Vec::new(),
            metadata: SkillMetadata { capture_count: 1, filtered_count: 0, tool_version: "0.1.0".to_string(), browser_cost: None },
            auth: None,
            provenance: Provenance::Unsigned,
            signature: None,
        }
    }

    #[test]
    fn canonicalize_is_order_independent() {
        let skill = sample_skill("api.example.com");
        let a = canonicalize(&skill).unwrap();
        let b = canonicalize(&skill).unwrap();
        assert_eq!(a, b);
        assert!(!a.contains("\"signature\""));
        assert!(!a.contains("\"provenance\""));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let skill = sample_skill("api.example.com");
        let key = b"test-signing-key";
        let sig = sign(&skill, key).unwrap();
        assert!(sig.starts_with("hmac-sha256:"));
        assert!(verify(&skill, &sig, key).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let skill = sample_skill("api.example.com");
        let sig = sign(&skill, b"key-one").unwrap();
        assert!(!verify(&skill, &sig, b"key-two").unwrap());
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let config = Config::from_env().with_base_dir(dir.path());
        let store = SkillStore::new(config);

        let stored = store.store(sample_skill("api.example.com")).unwrap();
        assert!(stored.signature.is_some());

        let key = store.signing_key().unwrap();
        let loaded = store.load("api.example.com", Some(&key)).unwrap();
        assert_eq!(loaded.domain, "api.example.com");
    }

    #[test]
    fn domain_validation_rejects_traversal() {
        assert!(validate_domain("../etc/passwd").is_err());
        assert!(validate_domain("a/b").is_err());
        assert!(validate_domain("").is_err());
        assert!(validate_domain("api.example.com").is_ok());
    }
}
