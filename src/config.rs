//! Environment variables and on-disk layout for persistent state.

use std::path::PathBuf;

/// Resolved runtime configuration: where state lives on disk, and
/// test-only overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for all persistent state. Default `~/.apitap`.
    pub base_dir: PathBuf,
    /// Skills subdirectory, default `<base_dir>/skills`.
    pub skills_dir: PathBuf,
    /// `APITAP_SKIP_SSRF_CHECK=1`, a test-only SSRF bypass.
    pub skip_ssrf_check: bool,
    /// `APITAP_MACHINE_ID` override for the vault's key-derivation input.
    pub machine_id_override: Option<String>,
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        let base_dir = std::env::var("APITAP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_base_dir());

        let skills_dir = std::env::var("APITAP_SKILLS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| base_dir.join("skills"));

        let skip_ssrf_check = std::env::var("APITAP_SKIP_SSRF_CHECK")
            .map(|v| v == "1")
            .unwrap_or(false);

        let machine_id_override = std::env::var("APITAP_MACHINE_ID").ok();

        Self {
            base_dir,
            skills_dir,
            skip_ssrf_check,
            machine_id_override,
        }
    }

    /// Override the base directory (and derive `skills_dir` from it),
    /// keeping every other field. Used by tests to point at a scratch
    /// directory instead of the real `~/.apitap`.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        self.skills_dir = base_dir.join("skills");
        self.base_dir = base_dir;
        self
    }

    /// Path to the credential vault file.
    pub fn auth_file(&self) -> PathBuf {
        self.base_dir.join("auth.enc")
    }

    /// Path to the per-install random salt file.
    pub fn install_salt_file(&self) -> PathBuf {
        self.base_dir.join("install-salt")
    }

    /// Path to the skill-file signing key.
    pub fn signing_key_file(&self) -> PathBuf {
        self.base_dir.join("signing.key")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".apitap")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_base_dir_derives_skills_dir() {
        let config = Config::from_env().with_base_dir("/tmp/scratch");
        assert_eq!(config.skills_dir, PathBuf::from("/tmp/scratch/skills"));
        assert_eq!(config.auth_file(), PathBuf::from("/tmp/scratch/auth.enc"));
    }
}
