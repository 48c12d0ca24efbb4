//! OpenDAL Operator factory for object-store backends

use anyhow::{Context, Result};
use opendal::Operator;
use sv_core::config::{BackendConfig, ProviderKind};

/// Minimal config needed to build an S3 operator
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    /// Key prefix acting as the application root
    pub root: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

/// Build an OpenDAL Operator for S3 (or any S3-compatible endpoint)
///
/// Uses path-style addressing (default in opendal 0.55), which MinIO and
/// SeaweedFS require.
pub fn build_operator(cfg: &S3Config) -> Result<Operator> {
    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let mut builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);
    if !cfg.root.is_empty() {
        builder = builder.root(&cfg.root);
    }

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// Local directory as a backend. The directory is created if missing.
pub fn build_fs_operator(root: &str) -> Result<Operator> {
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL fs operator at {root}"))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

pub fn build_memory_operator() -> Result<Operator> {
    Ok(Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish())
}

/// S3 credentials for backend `tag`: `SV_<TAG>_ACCESS_KEY_ID` /
/// `SV_<TAG>_SECRET_ACCESS_KEY`, falling back to the AWS variables.
pub fn credentials_from_env(tag: &str) -> Option<(String, String)> {
    let upper = tag.to_ascii_uppercase();
    let lookup = |suffix: &str, fallback: &str| {
        std::env::var(format!("SV_{upper}_{suffix}"))
            .or_else(|_| std::env::var(fallback))
            .ok()
    };
    Some((
        lookup("ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID")?,
        lookup("SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY")?,
    ))
}

/// Build an operator for a configured backend.
pub fn build_from_backend_config(cfg: &BackendConfig) -> Result<Operator> {
    match cfg.provider {
        ProviderKind::Fs => {
            let root = sv_core::config::expand_home(std::path::Path::new(&cfg.root));
            build_fs_operator(&root.to_string_lossy())
        }
        ProviderKind::Memory => build_memory_operator(),
        ProviderKind::S3 => {
            let endpoint = cfg
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://s3.amazonaws.com".into());
            if endpoint.starts_with("http://") {
                tracing::warn!(
                    backend = %cfg.tag,
                    endpoint = %endpoint,
                    "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
                );
            }
            let bucket = cfg
                .bucket
                .clone()
                .with_context(|| format!("s3 backend {} has no bucket", cfg.tag))?;
            let (access_key_id, secret_access_key) = credentials_from_env(&cfg.tag)
                .with_context(|| format!("no S3 credentials in the environment for {}", cfg.tag))?;

            build_operator(&S3Config {
                endpoint,
                region: cfg.region.clone().unwrap_or_else(|| "us-east-1".into()),
                bucket,
                root: cfg.root.clone(),
                access_key_id,
                secret_access_key,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_operator_valid() {
        let cfg = S3Config {
            endpoint: "http://localhost:8333".to_string(),
            region: "us-east-1".to_string(),
            bucket: "test-bucket".to_string(),
            root: "apps/splitvault".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
        };
        assert!(build_operator(&cfg).is_ok());
    }

    #[test]
    fn test_build_fs_operator() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path().join("cloud");
        assert!(build_fs_operator(&root.to_string_lossy()).is_ok());
    }

    #[test]
    fn test_s3_without_credentials_fails() {
        let cfg = BackendConfig {
            tag: "NOCREDS_TEST".into(),
            provider: ProviderKind::S3,
            email: "a@x".into(),
            root: String::new(),
            endpoint: Some("https://s3.example.com".into()),
            region: None,
            bucket: Some("b".into()),
            hard_delete: true,
        };
        if std::env::var("AWS_ACCESS_KEY_ID").is_err() {
            assert!(build_from_backend_config(&cfg).is_err());
        }
    }
}
