//! Shared sessions and their key exchange.
//!
//! The owner seals the session key under their master key as `$FEK`. A
//! joining member cannot read that, so it publishes an RSA public key as
//! `$PUBLIC_{email}` and keeps the private half sealed under its own master
//! key as `$TFEK_{email}`. Any member holding the key later wraps it for the
//! joiner as `$SHARED_{email}`; on its next authenticate the joiner unwraps
//! it, stores `$FEK_{email}` and removes the exchange objects.
//!
//! ```text
//! None --publish--> TfekPending --unwrap $SHARED--> Loaded
//!   \------------------ $FEK / $FEK_{me} ----------/   (Owner if $FEK)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use sv_core::names::{self, FEK, FEK_PREFIX, PUBLIC_PREFIX, SHARED_PREFIX, TFEK_PREFIX};
use sv_core::{SvError, SvResult};
use sv_crypto::{wrap_session_key, Cipher, HandshakeKeys, SessionKey};
use sv_split::Splitter;
use tracing::{debug, info, warn};

use crate::pool::Gathered;
use crate::replicated::ReplicaName;
use crate::scratch::ScratchSpace;
use crate::session::{RootKind, Session, SessionOptions};

/// How far this account got in obtaining the session key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    /// Nothing published yet
    None,
    /// Public key published, waiting for a member to wrap the key
    TfekPending,
    /// Key recovered from `$FEK_{email}`
    Loaded,
    /// This account created the session and holds `$FEK`
    Owner,
}

impl KeyState {
    pub fn has_key(self) -> bool {
        matches!(self, KeyState::Loaded | KeyState::Owner)
    }
}

#[derive(Debug)]
pub struct SharedSession {
    session: Arc<Session>,
    master: Cipher,
    rsa_bits: usize,
    state: RwLock<KeyState>,
}

impl SharedSession {
    /// A handle on the shared folder `opts.name`. Nothing is read until
    /// [`SharedSession::authenticate`].
    pub fn new(
        opts: SessionOptions,
        backends: Vec<sv_storage::BackendRef>,
        master: Cipher,
        splitter: Splitter,
        scratch: Arc<ScratchSpace>,
        rsa_bits: usize,
    ) -> Self {
        let opts = SessionOptions {
            root_kind: RootKind::Shared,
            ..opts
        };
        let cipher = Cipher::new(master.kind());
        Self {
            session: Arc::new(Session::new(opts, backends, cipher, splitter, scratch)),
            master,
            rsa_bits,
            state: RwLock::new(KeyState::None),
        }
    }

    /// Share the folder with `emails` on every backend and become its
    /// owner, with a fresh session key for `cipher`.
    ///
    /// Fails if the folder is already shared on any backend.
    pub async fn create(&self, cipher: Cipher, emails: &[String]) -> SvResult<()> {
        let name = self.name().to_string();
        self.session.configure(cipher, self.session.splitter());

        let members = emails.to_vec();
        let gathered = self
            .session
            .on_each(self.session.backends(), |b| {
                let name = name.clone();
                let members = members.clone();
                async move {
                    if !b.is_authenticated() {
                        b.authenticate_cloud().await?;
                    }
                    let folder = b.get_session_folder(&name).await?;
                    if b.get_members_shared(&folder).await?.is_some() {
                        return Err(SvError::AlreadyExists(format!(
                            "{name} is already shared on {}",
                            b.name()
                        )));
                    }
                    b.share_folder(&folder, &members).await
                }
            })
            .await;
        require_everywhere(gathered)?;

        self.session.connect().await?;
        let key = self.session.cipher().generate_key();
        let sealed = self.master.encrypt(key.as_bytes())?;
        require_everywhere(self.session.upload_replicated(FEK, Bytes::from(sealed)).await?)?;
        self.session.set_key(key);
        self.session.load_meta().await?;
        *self.state.write() = KeyState::Owner;
        info!(session = %name, members = ?emails, "shared session created");
        Ok(())
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn key_state(&self) -> KeyState {
        *self.state.read()
    }

    /// The underlying session, once the key is known.
    pub fn session(&self) -> SvResult<Arc<Session>> {
        if self.key_state().has_key() {
            Ok(self.session.clone())
        } else {
            Err(SvError::HandshakeIncomplete(self.name().to_string()))
        }
    }

    /// Connect, load `$META` and advance the key exchange as far as the
    /// objects present allow.
    pub async fn authenticate(&self) -> SvResult<KeyState> {
        self.session.connect().await?;
        self.session.load_meta().await?;
        let state = self.resolve_key().await?;
        *self.state.write() = state;
        debug!(session = %self.name(), state = ?state, "key state");
        Ok(state)
    }

    async fn resolve_key(&self) -> SvResult<KeyState> {
        if self.key_state().has_key() && self.session.has_key() {
            return Ok(self.key_state());
        }

        if self.is_owner().await? {
            if let Some(sealed) = self.session.download_replicated(FEK).await? {
                let key = SessionKey::from_slice(&self.master.decrypt(&sealed)?)?;
                self.session.set_key(key);
                return Ok(KeyState::Owner);
            }
            warn!(session = %self.name(), "owner is missing $FEK");
        }

        if let Some(sealed) = self
            .session
            .download_replicated(ReplicaName::PerAccount(FEK_PREFIX))
            .await?
        {
            let key = SessionKey::from_slice(&self.master.decrypt(&sealed)?)?;
            self.session.set_key(key);
            return Ok(KeyState::Loaded);
        }

        let mut pending = false;
        for b in self.session.backends() {
            let tag = b.name().to_string();
            let email = b.email().to_string();
            let tfek = self.read_optional(&tag, &names::tfek_name(&email)).await;
            let wrapped = self.read_optional(&tag, &names::shared_name(&email)).await;
            match (tfek, wrapped) {
                (Some(tfek), Some(wrapped)) => {
                    let der = zeroize::Zeroizing::new(self.master.decrypt(&tfek)?);
                    let keys = HandshakeKeys::from_private_der(&der)?;
                    let key = keys.unwrap_session_key(&wrapped)?;
                    self.complete_exchange(key).await?;
                    return Ok(KeyState::Loaded);
                }
                (Some(_), None) => {
                    if self.read_optional(&tag, &names::public_name(&email)).await.is_some() {
                        pending = true;
                    }
                }
                _ => {}
            }
        }
        if pending {
            return Ok(KeyState::TfekPending);
        }

        self.publish_exchange_keys().await?;
        Ok(KeyState::TfekPending)
    }

    async fn read_optional(&self, tag: &str, object: &str) -> Option<Bytes> {
        match self.session.download_from(tag, object).await {
            Ok(found) => found,
            Err(e) => {
                debug!(backend = %tag, object, error = %e, "probe failed");
                None
            }
        }
    }

    /// Whether this account owns the folder on the first reachable backend.
    async fn is_owner(&self) -> SvResult<bool> {
        let root = self.session.root()?;
        for b in self.session.backends() {
            let Some(handle) = root.handle(b.name()) else { continue };
            match b.get_owner(handle).await {
                Ok(owner) => return Ok(owner == b.email()),
                Err(e) => debug!(backend = %b.name(), error = %e, "owner lookup failed"),
            }
        }
        Ok(false)
    }

    /// Persist the unwrapped key as `$FEK_{me}` and drop the exchange objects.
    async fn complete_exchange(&self, key: SessionKey) -> SvResult<()> {
        let sealed = self.master.encrypt(key.as_bytes())?;
        let stored = self
            .session
            .upload_replicated(ReplicaName::PerAccount(FEK_PREFIX), Bytes::from(sealed))
            .await?;
        if stored.ok_count() == 0 {
            return require_everywhere(stored);
        }
        for prefix in [SHARED_PREFIX, TFEK_PREFIX, PUBLIC_PREFIX] {
            let removed = self
                .session
                .delete_replicated(ReplicaName::PerAccount(prefix))
                .await?;
            for (tag, e) in removed.failures() {
                warn!(backend = %tag, prefix, error = %e, "could not remove exchange object");
            }
        }
        self.session.set_key(key);
        info!(session = %self.name(), "session key received");
        Ok(())
    }

    /// Generate one RSA pair and publish it for every backend account.
    async fn publish_exchange_keys(&self) -> SvResult<()> {
        let bits = self.rsa_bits;
        let keys = tokio::task::spawn_blocking(move || HandshakeKeys::generate(bits))
            .await
            .map_err(|e| anyhow::anyhow!("key generation task failed: {e}"))??;
        let sealed = self.master.encrypt(&keys.private_der()?)?;
        let pem = keys.public_pem()?;

        require_any(
            self.session
                .upload_replicated(ReplicaName::PerAccount(TFEK_PREFIX), Bytes::from(sealed))
                .await?,
        )?;
        require_any(
            self.session
                .upload_replicated(ReplicaName::PerAccount(PUBLIC_PREFIX), Bytes::from(pem.into_bytes()))
                .await?,
        )?;
        info!(session = %self.name(), "published exchange key; waiting for a member");
        Ok(())
    }

    /// Wrap the session key for every member that published a public key.
    ///
    /// Returns the emails served.
    pub async fn share_keys(&self) -> SvResult<Vec<String>> {
        if !self.key_state().has_key() {
            return Err(SvError::HandshakeIncomplete(self.name().to_string()));
        }
        let key = self
            .session
            .cipher()
            .key()
            .cloned()
            .ok_or_else(|| SvError::HandshakeIncomplete(self.name().to_string()))?;
        let mine: HashSet<String> = self
            .session
            .backends()
            .iter()
            .map(|b| b.email().to_string())
            .collect();

        let mut peers: BTreeMap<String, (String, sv_storage::RemoteFile)> = BTreeMap::new();
        for (tag, file) in self.session.list_replicated(PUBLIC_PREFIX).await? {
            let email = file.name[PUBLIC_PREFIX.len()..].to_string();
            if !mine.contains(&email) {
                peers.entry(email).or_insert((tag, file));
            }
        }

        let mut served = Vec::new();
        for (email, (tag, file)) in peers {
            let Some(b) = self.session.backend(&tag) else { continue };
            let pem = match b.download_file(&file).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(peer = %email, error = %e, "could not read public key");
                    continue;
                }
            };
            let wrapped = match wrap_session_key(&pem, &key) {
                Ok(w) => w,
                Err(e) => {
                    warn!(peer = %email, error = %e, "skipping unusable public key");
                    continue;
                }
            };
            let stored = self
                .session
                .upload_replicated(names::shared_name(&email), Bytes::from(wrapped))
                .await?;
            if stored.ok_count() > 0 {
                info!(session = %self.name(), peer = %email, "wrapped session key");
                served.push(email);
            }
        }
        Ok(served)
    }

    /// Whether the folder is still shared on any backend.
    pub async fn is_accessible(&self) -> bool {
        let Ok(root) = self.session.root() else {
            return false;
        };
        let gathered = self
            .session
            .on_each_dir(&root, |b, h| async move { b.get_members_shared(&h).await })
            .await;
        let accessible = gathered.successes().any(|(_, members)| members.is_some());
        accessible
    }

    /// Union of members across backends, owner included.
    pub async fn members(&self) -> SvResult<Vec<String>> {
        let root = self.session.root()?;
        let gathered = self
            .session
            .on_each_dir(&root, |b, h| async move { b.get_members_shared(&h).await })
            .await;
        if gathered.ok_count() == 0 {
            return Err(gathered
                .into_all()
                .err()
                .unwrap_or_else(|| SvError::NotFound(self.name().to_string())));
        }
        let members: BTreeSet<String> = gathered
            .successes()
            .flat_map(|(_, m)| m.iter().flatten().cloned())
            .collect();
        Ok(members.into_iter().collect())
    }

    /// Stop being a member on every backend.
    pub async fn leave(&self) -> SvResult<()> {
        let root = self.session.root()?;
        let gathered = self
            .session
            .on_each_dir(&root, |b, h| async move { b.leave_shared_folder(&h).await })
            .await;
        require_any(gathered)?;
        self.forget();
        info!(session = %self.name(), "left shared session");
        Ok(())
    }

    /// Unshare and delete the folder everywhere. Owner only.
    pub async fn delete(&self) -> SvResult<()> {
        if self.key_state() != KeyState::Owner {
            return Err(SvError::PermissionDenied(format!("only the owner can delete {}", self.name())));
        }
        let root = self.session.root()?;
        let gathered = self
            .session
            .on_each_dir(&root, |b, h| async move {
                b.unshare_folder(&h).await?;
                b.delete_folder(&h).await
            })
            .await;
        require_everywhere(gathered)?;
        self.forget();
        info!(session = %self.name(), "shared session deleted");
        Ok(())
    }

    fn forget(&self) {
        self.session.clear();
        *self.state.write() = KeyState::None;
    }
}

fn require_everywhere<T>(gathered: Gathered<String, T>) -> SvResult<()> {
    gathered.into_all().map(|_| ())
}

fn require_any<T>(gathered: Gathered<String, T>) -> SvResult<()> {
    if gathered.ok_count() > 0 {
        return Ok(());
    }
    gathered.into_all().map(|_| ())
}
