#![allow(dead_code)]

use std::sync::Arc;

use sv_core::config::{BackendConfig, ProviderKind, SvConfig};
use sv_crypto::{Cipher, CipherKind, KdfParams};
use sv_session::{ScratchSpace, Session, SessionOptions};
use sv_split::Splitter;
use sv_storage::{BackendRef, CloudBackend, MemoryBackend, MemoryCloud};

/// Simulated clouds shared by every account in a test.
pub struct World {
    pub clouds: Vec<Arc<MemoryCloud>>,
}

impl World {
    pub fn new(tags: &[&str]) -> Self {
        Self {
            clouds: tags.iter().map(|t| MemoryCloud::new(*t)).collect(),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        self.clouds.iter().map(|c| c.label().to_string()).collect()
    }

    /// One authenticated backend per cloud for `email`, in cloud order.
    pub async fn account(&self, email: &str) -> Vec<Arc<MemoryBackend>> {
        self.account_with(email, true).await
    }

    /// Like [`World::account`], but deletes land in `$DELETED`.
    pub async fn soft_delete_account(&self, email: &str) -> Vec<Arc<MemoryBackend>> {
        self.account_with(email, false).await
    }

    async fn account_with(&self, email: &str, hard_delete: bool) -> Vec<Arc<MemoryBackend>> {
        let mut out = Vec::new();
        for cloud in &self.clouds {
            let b = MemoryBackend::new(cloud.label(), email, cloud.clone()).with_hard_delete(hard_delete);
            b.authenticate_cloud().await.expect("authenticate");
            out.push(Arc::new(b));
        }
        out
    }
}

pub fn refs(backends: &[Arc<MemoryBackend>]) -> Vec<BackendRef> {
    backends.iter().map(|b| b.clone() as BackendRef).collect()
}

pub fn fast_kdf() -> KdfParams {
    KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

pub fn keyed(kind: CipherKind) -> Cipher {
    let mut cipher = Cipher::new(kind);
    let key = cipher.generate_key();
    cipher.set_key(key);
    cipher
}

pub fn scratch() -> Arc<ScratchSpace> {
    Arc::new(ScratchSpace::temporary().expect("scratch"))
}

pub fn options(name: &str) -> SessionOptions {
    SessionOptions {
        name: name.to_string(),
        root_kind: sv_session::RootKind::Private,
        workers_per_backend: 2,
        exclude_patterns: vec!["*.tmp".into()],
    }
}

/// An authenticated private session with `$META` loaded.
pub async fn open_session(
    name: &str,
    backends: &[Arc<MemoryBackend>],
    cipher: Cipher,
    split: &str,
    scratch: Arc<ScratchSpace>,
) -> Session {
    let session = Session::new(
        options(name),
        refs(backends),
        cipher,
        Splitter::from_name(split).expect("split"),
        scratch,
    );
    session.authenticate().await.expect("session authenticate");
    session
}

/// Config for a gateway over memory backends with cheap key derivation.
pub fn memory_config(tags: &[String], email: &str) -> SvConfig {
    let mut config = SvConfig::default();
    config.backends = tags
        .iter()
        .map(|tag| BackendConfig {
            tag: tag.clone(),
            provider: ProviderKind::Memory,
            email: email.to_string(),
            root: String::new(),
            endpoint: None,
            region: None,
            bucket: None,
            hard_delete: true,
        })
        .collect();
    config.crypto.argon2_mem_cost_kib = 1024;
    config.crypto.argon2_time_cost = 1;
    config.crypto.argon2_parallelism = 1;
    config.crypto.rsa_bits = 1024;
    config.session.workers_per_backend = 2;
    config
}

pub fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            x as u8
        })
        .collect()
}

/// The raw object `object` in `dir` of session `session`, as one backend sees it.
pub async fn raw_object(
    backend: &MemoryBackend,
    session: &str,
    dir: &str,
    object: &str,
) -> Option<sv_storage::RemoteFile> {
    let mut folder = backend.get_session_folder(session).await.expect("session folder");
    for segment in dir.split('/').filter(|s| !s.is_empty()) {
        folder = backend
            .get_children(&folder, false)
            .await
            .expect("children")
            .into_iter()
            .find_map(|item| match item {
                sv_storage::RemoteItem::Folder(f) if f.name == segment => Some(f),
                _ => None,
            })?;
    }
    backend.get_file(&folder, object).await.expect("get_file")
}
