use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SvError, SvResult};

/// Top-level configuration (loaded from sv.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SvConfig {
    /// Cloud backends in their default share order
    pub backends: Vec<BackendConfig>,
    pub app: AppConfig,
    pub session: SessionConfig,
    pub crypto: CryptoConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
    /// Where downloaded files land
    pub download_dir: PathBuf,
    /// Scratch directory for open/copy (default: a per-process temp dir)
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the main session folder under every backend root
    pub name: String,
    /// Cipher written to $META for new accounts
    pub default_encrypt: String,
    /// Split codec written to $META for new accounts
    pub default_split: String,
    /// Worker pool size is this times the number of backends
    pub workers_per_backend: usize,
    /// Glob patterns skipped by folder uploads
    pub exclude_patterns: Vec<String>,
}

/// Password KDF and key-exchange parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 102400 = 100 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 2)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 8)
    pub argon2_parallelism: u32,
    /// RSA modulus size for shared-session handshakes
    pub rsa_bits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Poll for newly shared folders in the background
    pub enabled: bool,
    /// Seconds between shared-folder polls
    pub poll_interval_secs: u64,
}

/// Which client library talks to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local directory through OpenDAL's fs service
    Fs,
    /// S3-compatible object store through OpenDAL
    S3,
    /// Process-local simulated cloud (tests, demos)
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Short identity tag written to $META order (e.g. "G", "D")
    pub tag: String,
    pub provider: ProviderKind,
    /// Account email on this backend
    pub email: String,
    /// Application root: a directory for fs, a key prefix for s3
    #[serde(default)]
    pub root: String,
    /// S3 endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// S3 region
    #[serde(default)]
    pub region: Option<String>,
    /// S3 bucket
    #[serde(default)]
    pub bucket: Option<String>,
    /// Delete objects outright instead of moving them to $DELETED
    #[serde(default = "default_true")]
    pub hard_delete: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "text".into(),
            download_dir: PathBuf::from("~/Downloads"),
            scratch_dir: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "splitvault".into(),
            default_encrypt: "aes".into(),
            default_split: "shamir".into(),
            workers_per_backend: 5,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 102400,
            argon2_time_cost: 2,
            argon2_parallelism: 8,
            rsa_bits: 2048,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 90,
        }
    }
}

impl SvConfig {
    /// Read a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> SvResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found (using defaults)");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: SvConfig = toml::from_str(&content)
            .map_err(|e| SvError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SvResult<()> {
        let mut tags = std::collections::HashSet::new();
        for backend in &self.backends {
            if backend.tag.is_empty() || backend.tag.contains('/') {
                return Err(SvError::Config(format!("invalid backend tag {:?}", backend.tag)));
            }
            if !tags.insert(backend.tag.as_str()) {
                return Err(SvError::Config(format!("duplicate backend tag {:?}", backend.tag)));
            }
            if backend.provider == ProviderKind::S3 && backend.bucket.is_none() {
                return Err(SvError::Config(format!("s3 backend {} needs a bucket", backend.tag)));
            }
        }
        for pattern in &self.session.exclude_patterns {
            glob::Pattern::new(pattern)
                .map_err(|e| SvError::Config(format!("invalid exclude pattern {pattern:?}: {e}")))?;
        }
        if self.session.workers_per_backend == 0 {
            return Err(SvError::Config("session.workers_per_backend must be > 0".into()));
        }
        Ok(())
    }

    /// Default config file location: ~/.config/splitvault/sv.toml
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config/splitvault/sv.toml")
    }
}

/// Expand a leading `~/` against $HOME.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[app]
log_level = "debug"
log_format = "json"
download_dir = "/tmp/downloads"

[session]
name = "vault"
default_encrypt = "xchacha20"
default_split = "none"
workers_per_backend = 3
exclude_patterns = ["*.tmp"]

[crypto]
argon2_mem_cost_kib = 1024
argon2_time_cost = 1
argon2_parallelism = 1
rsa_bits = 1024

[sync]
enabled = false
poll_interval_secs = 30

[[backends]]
tag = "G"
provider = "fs"
email = "me@example.com"
root = "/srv/cloud-g"

[[backends]]
tag = "D"
provider = "s3"
email = "me@example.com"
root = "apps/splitvault"
endpoint = "https://s3.example.com"
region = "eu-west-1"
bucket = "vault"
hard_delete = false
"#;
        let config: SvConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.app.log_level, "debug");
        assert_eq!(config.app.download_dir, PathBuf::from("/tmp/downloads"));
        assert_eq!(config.session.name, "vault");
        assert_eq!(config.session.workers_per_backend, 3);
        assert_eq!(config.crypto.rsa_bits, 1024);
        assert!(!config.sync.enabled);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].provider, ProviderKind::Fs);
        assert!(config.backends[0].hard_delete);
        assert_eq!(config.backends[1].bucket.as_deref(), Some("vault"));
        assert!(!config.backends[1].hard_delete);
    }

    #[test]
    fn test_parse_defaults() {
        let config: SvConfig = toml::from_str("").unwrap();

        assert_eq!(config.app.log_level, "info");
        assert_eq!(config.session.name, "splitvault");
        assert_eq!(config.session.default_encrypt, "aes");
        assert_eq!(config.session.default_split, "shamir");
        assert_eq!(config.session.workers_per_backend, 5);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 102400);
        assert_eq!(config.crypto.argon2_time_cost, 2);
        assert_eq!(config.crypto.argon2_parallelism, 8);
        assert_eq!(config.sync.poll_interval_secs, 90);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let toml_str = r#"
[[backends]]
tag = "G"
provider = "memory"
email = "a@x"

[[backends]]
tag = "G"
provider = "memory"
email = "a@x"
"#;
        let config: SvConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.validate(), Err(SvError::Config(_))));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let toml_str = r#"
[[backends]]
tag = "S"
provider = "s3"
email = "a@x"
"#;
        let config: SvConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_exclude_pattern_rejected() {
        let config: SvConfig = toml::from_str("[session]\nexclude_patterns = [\"[unclosed\"]\n").unwrap();
        assert!(matches!(config.validate(), Err(SvError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = SvConfig::load(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config.session.name, "splitvault");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SvConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SvConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.session.name, parsed.session.name);
        assert_eq!(config.crypto.rsa_bits, parsed.crypto.rsa_bits);
    }
}
