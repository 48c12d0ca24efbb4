//! The single entry point a front end talks to.
//!
//! Owns the configured backends, the main session, every shared session
//! and the shared-folder watcher. Item operations take a [`Scope`] naming
//! the session they act on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use secrecy::SecretString;
use serde::Serialize;
use sv_core::config::{expand_home, SvConfig};
use sv_core::{ListedItem, SvError, SvResult};
use sv_crypto::{Cipher, KdfParams};
use sv_split::Splitter;
use sv_storage::{BackendRef, BackendRegistry};
use tracing::{info, warn};

use crate::replicated::IntegrityReport;
use crate::scratch::ScratchSpace;
use crate::session::{Session, SessionOptions};
use crate::shared::{KeyState, SharedSession};
use crate::transfer::{FolderTransfer, ProgressFn, RepairReport, Transfer};
use crate::watcher::{poll_shared_folders, DiscoveryFn, SharedFolderWatcher};

/// Which session an item operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Main,
    Shared(String),
}

impl Scope {
    /// `None` is the main session.
    pub fn from_option(name: Option<&str>) -> Self {
        match name {
            Some(n) => Scope::Shared(n.to_string()),
            None => Scope::Main,
        }
    }
}

/// A shared session as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct SharedFolderInfo {
    pub name: String,
    pub state: KeyState,
}

/// Authentication status of one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub tag: String,
    pub email: String,
    pub authenticated: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct Gateway {
    config: SvConfig,
    backends: Vec<BackendRef>,
    scratch: Arc<ScratchSpace>,
    kdf: KdfParams,
    main: RwLock<Option<Arc<Session>>>,
    shared: RwLock<BTreeMap<String, Arc<SharedSession>>>,
    watcher: Mutex<Option<SharedFolderWatcher>>,
}

impl Gateway {
    /// Resolve the configured backends through the process registry.
    pub fn new(config: SvConfig) -> SvResult<Self> {
        let backends = BackendRegistry::global().resolve_all(&config.backends)?;
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: SvConfig, backends: Vec<BackendRef>) -> SvResult<Self> {
        config.validate()?;
        if backends.is_empty() {
            return Err(SvError::Config("no backends configured".into()));
        }
        let scratch = match &config.app.scratch_dir {
            Some(dir) => ScratchSpace::at(expand_home(dir))?,
            None => ScratchSpace::temporary()?,
        };
        Ok(Self {
            kdf: KdfParams::from(&config.crypto),
            config,
            backends,
            scratch: Arc::new(scratch),
            main: RwLock::new(None),
            shared: RwLock::new(BTreeMap::new()),
            watcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SvConfig {
        &self.config
    }

    pub fn backends(&self) -> &[BackendRef] {
        &self.backends
    }

    fn new_main_session(&self, encrypt: &str, split: &str) -> SvResult<Session> {
        Ok(Session::new(
            SessionOptions::main(&self.config.session),
            self.backends.clone(),
            Cipher::from_name(encrypt)?,
            Splitter::from_name(split)?,
            self.scratch.clone(),
        ))
    }

    fn main(&self) -> SvResult<Arc<Session>> {
        self.main
            .read()
            .clone()
            .ok_or_else(|| SvError::NotAuthenticated("not logged in".into()))
    }

    fn shared_session(&self, name: &str) -> SvResult<Arc<SharedSession>> {
        self.shared
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SvError::NotFound(format!("shared folder {name}")))
    }

    fn session(&self, scope: &Scope) -> SvResult<Arc<Session>> {
        match scope {
            Scope::Main => self.main(),
            Scope::Shared(name) => self.shared_session(name)?.session(),
        }
    }

    // ── accounts ─────────────────────────────────────────────────────────

    /// Authenticate every backend that is not already.
    pub async fn authenticate(&self) -> Vec<BackendStatus> {
        let mut statuses = Vec::with_capacity(self.backends.len());
        for b in &self.backends {
            let error = if b.is_authenticated() {
                None
            } else {
                b.authenticate_cloud().await.err().map(|e| e.to_string())
            };
            statuses.push(BackendStatus {
                tag: b.name().to_string(),
                email: b.email().to_string(),
                authenticated: b.is_authenticated(),
                error,
            });
        }
        statuses
    }

    pub async fn account_exists(&self) -> SvResult<bool> {
        let probe = self.new_main_session(
            &self.config.session.default_encrypt,
            &self.config.session.default_split,
        )?;
        probe.connect().await?;
        probe.account_exists().await
    }

    /// Create the account and log in.
    pub async fn create_account(
        &self,
        password: &SecretString,
        encrypt: Option<&str>,
        split: Option<&str>,
    ) -> SvResult<()> {
        let encrypt = encrypt.unwrap_or(self.config.session.default_encrypt.as_str());
        let split = split.unwrap_or(self.config.session.default_split.as_str());
        let session = self.new_main_session(encrypt, split)?;
        session.connect().await?;
        if session.account_exists().await? {
            return Err(SvError::AlreadyExists("account".into()));
        }
        session
            .create_login_metadata(password, encrypt, split, &self.kdf)
            .await?;
        session.load_meta().await?;
        *self.main.write() = Some(Arc::new(session));
        info!(encrypt, split, "account ready");
        Ok(())
    }

    /// Log in with `password`, load the main session and discover shared
    /// sessions.
    pub async fn app_authenticate(&self, password: &SecretString) -> SvResult<()> {
        let session = self.new_main_session(
            &self.config.session.default_encrypt,
            &self.config.session.default_split,
        )?;
        session.connect().await?;
        session.login(password, &self.kdf).await?;
        session.load_meta().await?;
        *self.main.write() = Some(Arc::new(session));

        if let Err(e) = self.refresh_shared_sessions().await {
            warn!(error = %e, "shared session discovery failed");
        }
        Ok(())
    }

    /// Stop the watcher and forget every session.
    pub async fn logout(&self) {
        self.stop_watcher().await;
        self.shared.write().clear();
        if let Some(main) = self.main.write().take() {
            main.clear();
        }
        info!("logged out");
    }

    // ── shared sessions ──────────────────────────────────────────────────

    fn new_shared_session(&self, name: &str, master: &Session, splitter: Splitter) -> SharedSession {
        SharedSession::new(
            SessionOptions::shared(name, &self.config.session),
            master.backends(),
            master.cipher(),
            splitter,
            self.scratch.clone(),
            self.config.crypto.rsa_bits,
        )
    }

    /// Pick up shared folders not seen yet and advance every key exchange.
    pub async fn refresh_shared_sessions(&self) -> SvResult<Vec<SharedFolderInfo>> {
        let main = self.main()?;
        let visible = poll_shared_folders(&main.backends()).await?;
        for name in &visible {
            if self.shared.read().contains_key(name) {
                continue;
            }
            let shared = Arc::new(self.new_shared_session(name, &main, main.splitter()));
            self.shared.write().insert(name.clone(), shared);
        }

        let sessions: Vec<Arc<SharedSession>> = self.shared.read().values().cloned().collect();
        for shared in sessions {
            if !visible.contains(shared.name()) {
                info!(session = %shared.name(), "shared folder no longer visible");
                self.shared.write().remove(shared.name());
                continue;
            }
            match shared.authenticate().await {
                Ok(state) if state.has_key() => {
                    if let Err(e) = shared.share_keys().await {
                        warn!(session = %shared.name(), error = %e, "share_keys failed");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(session = %shared.name(), error = %e, "shared session unavailable"),
            }
        }
        Ok(self.get_shared_folders())
    }

    pub fn get_shared_folders(&self) -> Vec<SharedFolderInfo> {
        self.shared
            .read()
            .values()
            .map(|s| SharedFolderInfo {
                name: s.name().to_string(),
                state: s.key_state(),
            })
            .collect()
    }

    /// Create a shared session named `name` with `emails` as members.
    pub async fn create_shared_session(
        &self,
        name: &str,
        emails: &[String],
        encrypt: Option<&str>,
        split: Option<&str>,
    ) -> SvResult<SharedFolderInfo> {
        sv_core::names::validate_basename(name)?;
        if self.shared.read().contains_key(name) {
            return Err(SvError::AlreadyExists(format!("shared folder {name}")));
        }
        let main = self.main()?;
        if name == main.name() {
            return Err(SvError::InvalidName(format!("{name} is the main session")));
        }
        let splitter = match split {
            Some(s) => Splitter::from_name(s)?,
            None => main.splitter(),
        };
        let shared = self.new_shared_session(name, &main, splitter);
        let cipher = match encrypt {
            Some(e) => Cipher::from_name(e)?,
            None => Cipher::new(main.cipher().kind()),
        };
        shared.create(cipher, emails).await?;
        let info = SharedFolderInfo {
            name: name.to_string(),
            state: shared.key_state(),
        };
        self.shared.write().insert(name.to_string(), Arc::new(shared));
        Ok(info)
    }

    /// Wrap the session key of `name` for members waiting on it.
    pub async fn share_keys(&self, name: &str) -> SvResult<Vec<String>> {
        self.shared_session(name)?.share_keys().await
    }

    pub async fn shared_members(&self, name: &str) -> SvResult<Vec<String>> {
        self.shared_session(name)?.members().await
    }

    pub async fn is_accessible(&self, name: &str) -> SvResult<bool> {
        Ok(self.shared_session(name)?.is_accessible().await)
    }

    pub async fn leave_shared_folder(&self, name: &str) -> SvResult<()> {
        self.shared_session(name)?.leave().await?;
        self.shared.write().remove(name);
        Ok(())
    }

    pub async fn delete_shared_folder(&self, name: &str) -> SvResult<()> {
        self.shared_session(name)?.delete().await?;
        self.shared.write().remove(name);
        Ok(())
    }

    pub async fn add_users_to_share(&self, _name: &str, _emails: &[String]) -> SvResult<()> {
        Err(SvError::Unimplemented("adding members to an existing shared folder"))
    }

    pub async fn revoke_user_from_share(&self, _name: &str, _email: &str) -> SvResult<()> {
        Err(SvError::Unimplemented("revoking a member of a shared folder"))
    }

    /// Poll for new shared folders every `sync.poll_interval_secs`.
    pub fn start_watcher(&self, on_new: DiscoveryFn) -> SvResult<()> {
        let main = self.main()?;
        let known = self.shared.read().keys().cloned().collect();
        let watcher = SharedFolderWatcher::spawn(
            main.backends(),
            Duration::from_secs(self.config.sync.poll_interval_secs.max(1)),
            known,
            on_new,
        );
        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    pub async fn stop_watcher(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(w) = watcher {
            w.stop().await;
        }
    }

    // ── items ────────────────────────────────────────────────────────────

    pub async fn get_items_in_folder(&self, scope: &Scope, path: &str) -> SvResult<Vec<ListedItem>> {
        self.session(scope)?.get_items_in_folder(path).await
    }

    pub async fn search_items_by_name(&self, scope: &Scope, needle: &str, under: &str) -> SvResult<Vec<ListedItem>> {
        self.session(scope)?.search_items_by_name(needle, under).await
    }

    pub async fn upload_file(&self, scope: &Scope, local: &Path, dir: &str) -> SvResult<Transfer> {
        self.session(scope)?.upload_file(local, dir, None).await
    }

    pub async fn upload_folder(
        &self,
        scope: &Scope,
        local: &Path,
        dir: &str,
        progress: Option<&ProgressFn>,
    ) -> SvResult<FolderTransfer> {
        self.session(scope)?.upload_folder(local, dir, progress).await
    }

    fn download_dir(&self, dest: Option<&Path>) -> PathBuf {
        match dest {
            Some(d) => d.to_path_buf(),
            None => expand_home(&self.config.app.download_dir),
        }
    }

    pub async fn download_file(&self, scope: &Scope, path: &str, dest: Option<&Path>) -> SvResult<PathBuf> {
        let dest = self.download_dir(dest);
        self.session(scope)?.download_file(path, &dest).await
    }

    pub async fn download_folder(
        &self,
        scope: &Scope,
        path: &str,
        dest: Option<&Path>,
        progress: Option<&ProgressFn>,
    ) -> SvResult<PathBuf> {
        let dest = self.download_dir(dest);
        self.session(scope)?.download_folder(path, &dest, progress).await
    }

    pub async fn open_file(&self, scope: &Scope, path: &str) -> SvResult<PathBuf> {
        self.session(scope)?.open_file(path).await
    }

    pub async fn delete_file(&self, scope: &Scope, path: &str) -> SvResult<()> {
        self.session(scope)?.delete_file(path).await
    }

    pub async fn delete_folder(&self, scope: &Scope, path: &str) -> SvResult<()> {
        self.session(scope)?.delete_folder(path).await
    }

    pub async fn create_folder(&self, scope: &Scope, parent: &str, name: &str) -> SvResult<ListedItem> {
        self.session(scope)?.create_folder(parent, name).await
    }

    pub async fn rename_item(&self, scope: &Scope, path: &str, new_name: &str) -> SvResult<ListedItem> {
        self.session(scope)?.rename_item(path, new_name).await
    }

    pub async fn copy_item(&self, scope: &Scope, src: &str, dest_dir: &str) -> SvResult<String> {
        self.session(scope)?.copy_item(src, dest_dir).await
    }

    pub async fn move_item(&self, scope: &Scope, src: &str, dest_dir: &str) -> SvResult<String> {
        self.session(scope)?.move_item(src, dest_dir).await
    }

    pub async fn repair_file(&self, scope: &Scope, path: &str) -> SvResult<RepairReport> {
        self.session(scope)?.repair_file(path).await
    }

    /// Compare the copies of a root-level replicated object.
    pub async fn check_integrity(&self, scope: &Scope, name: &str) -> SvResult<IntegrityReport> {
        self.session(scope)?.check_replicated_integrity(name).await
    }
}
