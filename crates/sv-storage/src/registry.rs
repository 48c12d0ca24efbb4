//! Process-wide backend singletons, one per (tag, email).

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sv_core::config::{BackendConfig, ProviderKind};
use sv_core::{SvError, SvResult};

use crate::backend::BackendRef;
use crate::memory::{MemoryBackend, MemoryCloud};
use crate::opendal_backend::OpendalBackend;
use crate::operator::build_from_backend_config;

/// Hands out the same adapter for the same (tag, email) pair, so
/// authentication happens once per account and is shared by all sessions.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Mutex<HashMap<(String, String), BackendRef>>,
    /// Simulated providers by tag; accounts on the same tag share one cloud
    clouds: Mutex<HashMap<String, Arc<MemoryCloud>>>,
}

static GLOBAL: OnceLock<BackendRegistry> = OnceLock::new();

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static BackendRegistry {
        GLOBAL.get_or_init(BackendRegistry::new)
    }

    /// The adapter for `cfg`, built on first use.
    pub fn get_or_create(&self, cfg: &BackendConfig) -> SvResult<BackendRef> {
        let key = (cfg.tag.clone(), cfg.email.clone());
        if let Some(existing) = self.backends.lock().get(&key) {
            return Ok(existing.clone());
        }

        let backend: BackendRef = match cfg.provider {
            ProviderKind::Memory => Arc::new(
                MemoryBackend::new(&cfg.tag, &cfg.email, self.memory_cloud(&cfg.tag))
                    .with_hard_delete(cfg.hard_delete),
            ),
            ProviderKind::Fs | ProviderKind::S3 => {
                let op = build_from_backend_config(cfg)
                    .map_err(|e| SvError::Config(format!("backend {}: {e:#}", cfg.tag)))?;
                Arc::new(
                    OpendalBackend::new(&cfg.tag, &cfg.email, op).with_hard_delete(cfg.hard_delete),
                )
            }
        };
        tracing::debug!(backend = %cfg.tag, email = %cfg.email, provider = ?cfg.provider, "backend created");

        // another caller may have raced us; keep whichever landed first
        Ok(self.backends.lock().entry(key).or_insert(backend).clone())
    }

    /// Register an externally built adapter. Returns the existing one if the
    /// pair is already known.
    pub fn register(&self, backend: BackendRef) -> BackendRef {
        let key = (backend.name().to_string(), backend.email().to_string());
        self.backends.lock().entry(key).or_insert(backend).clone()
    }

    /// The simulated cloud behind memory backends tagged `tag`.
    pub fn memory_cloud(&self, tag: &str) -> Arc<MemoryCloud> {
        self.clouds
            .lock()
            .entry(tag.to_string())
            .or_insert_with(|| MemoryCloud::new(tag.to_ascii_lowercase()))
            .clone()
    }

    /// Adapters for every configured backend, in config order.
    pub fn resolve_all(&self, configs: &[BackendConfig]) -> SvResult<Vec<BackendRef>> {
        configs.iter().map(|cfg| self.get_or_create(cfg)).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
