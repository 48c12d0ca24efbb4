//! Session core: one key, one ordered backend list, one path cache.
//!
//! A session maps logical paths (`/a/b/file.txt`) onto share objects spread
//! over every backend in `$META.order`. Nothing but the backends' own
//! listings records where things are; the path cache is rebuilt from them
//! lazily by [`Session::get_items_in_folder`].

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use sv_core::config::SessionConfig;
use sv_core::names::{self, META, ROOT};
use sv_core::{ItemKind, ListedItem, SessionMeta, SvError, SvResult};
use sv_crypto::{Cipher, CipherKind, SessionKey};
use sv_split::Splitter;
use sv_storage::{BackendRef, RemoteFolder, RemoteItem};
use tracing::{debug, info, warn};

use crate::cache::{CloudFile, Directory, Entry, PathCache};
use crate::pool::{Gathered, WorkerPool};
use crate::scratch::ScratchSpace;

/// How a session finds its root folder on each backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// A folder under the account's application root, created on demand
    Private,
    /// A folder shared by or with this account
    Shared,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Session root folder name on every backend
    pub name: String,
    pub root_kind: RootKind,
    pub workers_per_backend: usize,
    /// Glob patterns skipped by folder uploads
    pub exclude_patterns: Vec<String>,
}

impl SessionOptions {
    pub fn main(cfg: &SessionConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            root_kind: RootKind::Private,
            workers_per_backend: cfg.workers_per_backend,
            exclude_patterns: cfg.exclude_patterns.clone(),
        }
    }

    pub fn shared(name: &str, cfg: &SessionConfig) -> Self {
        Self {
            name: name.to_string(),
            root_kind: RootKind::Shared,
            ..Self::main(cfg)
        }
    }
}

#[derive(Debug)]
struct SessionState {
    order: Vec<String>,
    cipher: Cipher,
    splitter: Splitter,
    meta_loaded: bool,
}

/// Consistent copy of the mutable session parameters for one operation.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub order: Vec<String>,
    pub cipher: Cipher,
    pub splitter: Splitter,
}

impl Snapshot {
    pub fn m(&self) -> usize {
        self.order.len()
    }

    pub fn position(&self, tag: &str) -> Option<usize> {
        self.order.iter().position(|t| t == tag)
    }
}

#[derive(Debug)]
pub struct Session {
    name: String,
    root_kind: RootKind,
    configured: Vec<BackendRef>,
    state: RwLock<SessionState>,
    pub(crate) cache: PathCache,
    pub(crate) pool: WorkerPool,
    pub(crate) scratch: Arc<ScratchSpace>,
    pub(crate) excludes: Vec<glob::Pattern>,
}

impl Session {
    pub fn new(
        opts: SessionOptions,
        backends: Vec<BackendRef>,
        cipher: Cipher,
        splitter: Splitter,
        scratch: Arc<ScratchSpace>,
    ) -> Self {
        let excludes = opts
            .exclude_patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();
        let order = backends.iter().map(|b| b.name().to_string()).collect();
        Self {
            pool: WorkerPool::for_backends(backends.len(), opts.workers_per_backend),
            name: opts.name,
            root_kind: opts.root_kind,
            configured: backends,
            state: RwLock::new(SessionState {
                order,
                cipher,
                splitter,
                meta_loaded: false,
            }),
            cache: PathCache::new(),
            scratch,
            excludes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_kind(&self) -> RootKind {
        self.root_kind
    }

    pub fn order(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    pub fn meta(&self) -> SessionMeta {
        let state = self.state.read();
        SessionMeta {
            encrypt: state.cipher.name().to_string(),
            split: state.splitter.name().to_string(),
            order: state.order.clone(),
        }
    }

    /// A copy of the session cipher, key included.
    pub fn cipher(&self) -> Cipher {
        self.state.read().cipher.copy()
    }

    pub fn splitter(&self) -> Splitter {
        self.state.read().splitter
    }

    pub fn has_key(&self) -> bool {
        self.state.read().cipher.key().is_some()
    }

    pub fn set_key(&self, key: SessionKey) {
        self.state.write().cipher.set_key(key);
    }

    /// Replace cipher and codec (e.g. with the names from `$LOGIN_META`).
    pub fn configure(&self, cipher: Cipher, splitter: Splitter) {
        let mut state = self.state.write();
        state.cipher = cipher;
        state.splitter = splitter;
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            order: state.order.clone(),
            cipher: state.cipher.copy(),
            splitter: state.splitter,
        }
    }

    /// The configured adapter for `tag`.
    pub fn backend(&self, tag: &str) -> Option<BackendRef> {
        self.configured.iter().find(|b| b.name() == tag).cloned()
    }

    /// Configured backends that appear in `order`, in that order.
    pub fn backends(&self) -> Vec<BackendRef> {
        self.order()
            .iter()
            .filter_map(|tag| self.backend(tag))
            .collect()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn scratch(&self) -> &Arc<ScratchSpace> {
        &self.scratch
    }

    /// The session root directory.
    pub(crate) fn root(&self) -> SvResult<Directory> {
        self.cache
            .get_dir(ROOT)
            .ok_or_else(|| SvError::NotAuthenticated(format!("session {} is not connected", self.name)))
    }

    /// Drop every cached path.
    pub fn clear(&self) {
        self.cache.clear();
    }

    // ── fan-out ──────────────────────────────────────────────────────────

    /// Run `f` once per backend on the worker pool.
    pub(crate) async fn on_each<T, F, Fut>(&self, backends: Vec<BackendRef>, f: F) -> Gathered<String, T>
    where
        F: Fn(BackendRef) -> Fut,
        Fut: Future<Output = SvResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let tasks = backends
            .into_iter()
            .map(|b| (b.name().to_string(), f(b)))
            .collect();
        self.pool.gather(tasks).await
    }

    /// Run `f` once per active backend against that backend's handle for
    /// `dir`. Backends without a handle fail with `NotFound`.
    pub(crate) async fn on_each_dir<T, F, Fut>(&self, dir: &Directory, f: F) -> Gathered<String, T>
    where
        F: Fn(BackendRef, RemoteFolder) -> Fut,
        Fut: Future<Output = SvResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let order = self.order();
        let mut tasks = Vec::new();
        let mut missing = Vec::new();
        for tag in &order {
            match (self.backend(tag), dir.handle(tag)) {
                (Some(b), Some(h)) => tasks.push((tag.clone(), f(b, h.clone()))),
                (None, _) => missing.push((
                    tag.clone(),
                    Err(SvError::NotAuthenticated(format!("backend {tag} is not configured"))),
                )),
                (Some(_), None) => missing.push((
                    tag.clone(),
                    Err(SvError::NotFound(format!("{} on {tag}", dir.path))),
                )),
            }
        }
        let mut gathered = self.pool.gather(tasks).await;
        if !missing.is_empty() {
            gathered.all_ok = false;
            gathered.results.extend(missing);
            gathered
                .results
                .sort_by_key(|(tag, _)| order.iter().position(|t| t == tag));
        }
        gathered
    }

    // ── authenticate / $META ─────────────────────────────────────────────

    /// Authenticate every backend and locate the session root on each.
    pub async fn connect(&self) -> SvResult<()> {
        let name = self.name.clone();
        let root_kind = self.root_kind;
        let gathered = self
            .on_each(self.configured.clone(), |b| {
                let name = name.clone();
                async move {
                    if !b.is_authenticated() {
                        b.authenticate_cloud().await?;
                    }
                    locate_root(&b, &name, root_kind).await
                }
            })
            .await;

        let mut root = self.cache.get_dir(ROOT).unwrap_or_else(|| Directory::new(ROOT));
        let mut first_error = None;
        for (tag, result) in gathered.results {
            match result {
                Ok(folder) => {
                    root.handles.insert(tag, folder);
                }
                Err(e) => {
                    warn!(session = %self.name, backend = %tag, error = %e, "backend unavailable");
                    first_error.get_or_insert(e);
                }
            }
        }
        if root.handles.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                SvError::Config("no backends configured".into())
            }));
        }
        debug!(session = %self.name, backends = root.handles.len(), "session root located");
        self.cache.insert_dir(root);
        Ok(())
    }

    /// Read `$META` and adopt it, or write it if this is a new session.
    pub async fn load_meta(&self) -> SvResult<SessionMeta> {
        let first_load = !self.state.read().meta_loaded;
        let mut stored = None;
        if first_load {
            let root = self.root()?;
            let first = self
                .order()
                .into_iter()
                .find(|tag| root.handle(tag).is_some());
            if let Some(tag) = first {
                stored = self.download_from(&tag, META).await.unwrap_or_else(|e| {
                    debug!(backend = %tag, error = %e, "first $META read failed");
                    None
                });
            }
        }
        if stored.is_none() {
            stored = self.download_replicated(META).await?;
        }

        let meta = match stored {
            Some(bytes) => {
                let meta = SessionMeta::from_bytes(&bytes)?;
                self.reconfigure(&meta)?;
                meta
            }
            None => {
                let meta = self.meta();
                let gathered = self
                    .upload_replicated(META, bytes::Bytes::from(meta.to_bytes()?))
                    .await?;
                if gathered.ok_count() == 0 {
                    return Err(gathered
                        .into_all()
                        .err()
                        .unwrap_or_else(|| SvError::Config("no backend accepted $META".into())));
                }
                info!(session = %self.name, order = ?meta.order, "created $META");
                meta
            }
        };
        self.state.write().meta_loaded = true;
        Ok(meta)
    }

    /// Connect, then load or bootstrap `$META`.
    pub async fn authenticate(&self) -> SvResult<SessionMeta> {
        self.connect().await?;
        self.load_meta().await
    }

    /// Adopt a stored descriptor: `order` replaces the backend list, and the
    /// cipher or codec is rebuilt if the names differ.
    fn reconfigure(&self, meta: &SessionMeta) -> SvResult<()> {
        let kind = CipherKind::from_name(&meta.encrypt)?;
        let splitter = Splitter::from_name(&meta.split)?;
        for tag in &meta.order {
            if self.backend(tag).is_none() {
                warn!(session = %self.name, backend = %tag, "$META lists a backend that is not configured");
            }
        }

        let mut state = self.state.write();
        let dropped: Vec<&String> = state
            .order
            .iter()
            .filter(|t| !meta.order.contains(t))
            .collect();
        if !dropped.is_empty() {
            info!(session = %self.name, dropped = ?dropped, "backends not in $META are inactive");
        }
        if state.order != meta.order {
            debug!(session = %self.name, from = ?state.order, to = ?meta.order, "reordering backends");
            state.order = meta.order.clone();
        }
        if state.cipher.kind() != kind {
            debug!(session = %self.name, cipher = %meta.encrypt, "switching cipher");
            state.cipher = state.cipher.rebuild(kind);
        }
        if state.splitter != splitter {
            debug!(session = %self.name, split = %meta.split, "switching split codec");
            state.splitter = splitter;
        }
        Ok(())
    }

    // ── directories ──────────────────────────────────────────────────────

    /// The directory at `path`, creating missing segments on every backend.
    ///
    /// A segment is usable once at least one backend created it; backends
    /// that failed are left without a handle.
    pub async fn ensure_directory(&self, path: &str) -> SvResult<Directory> {
        self.ensure_directory_with(path, false).await
    }

    pub(crate) async fn ensure_directory_with(&self, path: &str, strict: bool) -> SvResult<Directory> {
        let path = names::normalize(path);
        if let Some(dir) = self.cache.get_dir(&path) {
            return Ok(dir);
        }
        if self.cache.get_file(&path).is_some() {
            return Err(SvError::AlreadyExists(format!("{path} is a file")));
        }

        let segments = names::segments(&path);
        let mut depth = segments.len();
        let mut current = loop {
            if depth == 0 {
                break self.root()?;
            }
            let prefix = names::normalize(&segments[..depth].join("/"));
            if let Some(dir) = self.cache.get_dir(&prefix) {
                break dir;
            }
            if self.cache.get_file(&prefix).is_some() {
                return Err(SvError::AlreadyExists(format!("{prefix} is a file")));
            }
            depth -= 1;
        };

        for segment in &segments[depth..] {
            names::validate_basename(segment)?;
            let child_path = names::join(&current.path, segment);
            let seg = segment.clone();
            let gathered = self
                .on_each_dir(&current, |b, parent| {
                    let seg = seg.clone();
                    async move { b.create_folder(&seg, &parent).await }
                })
                .await;

            let mut dir = Directory::new(&child_path);
            let mut first_error = None;
            for (tag, result) in gathered.results {
                match result {
                    Ok(folder) => {
                        dir.handles.insert(tag, folder);
                    }
                    Err(e) => {
                        warn!(path = %child_path, backend = %tag, error = %e, "create_folder failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                if strict || dir.handles.is_empty() {
                    if !dir.handles.is_empty() {
                        self.cache.insert_dir(dir);
                    }
                    return Err(e);
                }
            }
            debug!(path = %child_path, "directory ready");
            self.cache.insert_dir(dir.clone());
            current = dir;
        }
        Ok(current)
    }

    /// The existing directory at `path`, consulting backend listings for
    /// segments that are not cached yet.
    pub async fn resolve_directory(&self, path: &str) -> SvResult<Directory> {
        let path = names::normalize(path);
        if let Some(dir) = self.cache.get_dir(&path) {
            return Ok(dir);
        }
        let mut current = self.root()?;
        for segment in names::segments(&path) {
            let child = names::join(&current.path, &segment);
            let next = match self.cache.get_dir(&child) {
                Some(dir) => dir,
                None => {
                    self.list_directory(&current).await?;
                    self.cache
                        .get_dir(&child)
                        .ok_or_else(|| SvError::NotFound(child.clone()))?
                }
            };
            current = next;
        }
        Ok(current)
    }

    /// The file or directory at `path`.
    pub async fn resolve(&self, path: &str) -> SvResult<Entry> {
        let path = names::normalize(path);
        if let Some(entry) = self.cache.get(&path) {
            return Ok(entry);
        }
        let parent = self.resolve_directory(&names::parent(&path)).await?;
        self.list_directory(&parent).await?;
        self.cache
            .get(&path)
            .ok_or_else(|| SvError::NotFound(path.clone()))
    }

    pub async fn resolve_file(&self, path: &str) -> SvResult<CloudFile> {
        match self.resolve(path).await? {
            Entry::File(file) => Ok(file),
            Entry::Directory(d) => Err(SvError::NotFound(format!("{} is a folder", d.path))),
        }
    }

    // ── listing ──────────────────────────────────────────────────────────

    /// List `path` on every backend and reconcile the cache with what they
    /// report. Reserved names are never returned.
    pub async fn get_items_in_folder(&self, path: &str) -> SvResult<Vec<ListedItem>> {
        let dir = self.resolve_directory(path).await?;
        self.list_directory(&dir).await
    }

    async fn list_directory(&self, dir: &Directory) -> SvResult<Vec<ListedItem>> {
        let gathered = self
            .on_each_dir(dir, |b, h| async move { b.get_children(&h, true).await })
            .await;
        if gathered.ok_count() == 0 {
            return Err(gathered
                .into_all()
                .err()
                .unwrap_or_else(|| SvError::NotFound(dir.path.clone())));
        }

        let copies = self.splitter().copies_per_cloud();
        let mut files: BTreeMap<String, CloudFile> = BTreeMap::new();
        let mut dirs: BTreeMap<String, Directory> = BTreeMap::new();
        let mut listed: HashSet<String> = HashSet::new();

        for (tag, result) in &gathered.results {
            let children = match result {
                Ok(children) => children,
                Err(e) => {
                    warn!(path = %dir.path, backend = %tag, error = %e, "listing failed");
                    continue;
                }
            };
            listed.insert(tag.clone());
            for item in children {
                match item {
                    RemoteItem::File(f) => {
                        let Some((index, base)) = names::parse_share_name(&f.name) else {
                            debug!(backend = %tag, name = %f.name, "ignoring foreign object");
                            continue;
                        };
                        if index > copies {
                            warn!(backend = %tag, name = %f.name, "share index out of range");
                            continue;
                        }
                        let file = files
                            .entry(base.to_string())
                            .or_insert_with(|| CloudFile::new(names::join(&dir.path, base)));
                        file.slots_mut(tag, copies)[index - 1] = Some(f.clone());
                    }
                    RemoteItem::Folder(f) => {
                        if names::is_reserved(&f.name) || f.name.contains(names::SHARE_SEPARATOR) {
                            continue;
                        }
                        dirs.entry(f.name.clone())
                            .or_insert_with(|| Directory::new(names::join(&dir.path, &f.name)))
                            .handles
                            .insert(tag.clone(), f.clone());
                    }
                }
            }
        }

        // keep what we knew from backends that could not be listed
        for file in files.values_mut() {
            if let Some(cached) = self.cache.get_file(&file.path) {
                for (tag, slots) in cached.shares {
                    if !listed.contains(&tag) {
                        *file.slots_mut(&tag, copies) = slots;
                    }
                }
            }
        }
        for child in dirs.values_mut() {
            if let Some(cached) = self.cache.get_dir(&child.path) {
                for (tag, handle) in cached.handles {
                    if !listed.contains(&tag) {
                        child.handles.entry(tag).or_insert(handle);
                    }
                }
            }
        }
        for name in dirs.keys() {
            if files.remove(name).is_some() {
                warn!(path = %names::join(&dir.path, name), "name is both a folder and a file; showing the folder");
            }
        }

        let observed: HashSet<String> = files
            .values()
            .map(|f| f.path.clone())
            .chain(dirs.values().map(|d| d.path.clone()))
            .collect();
        for stale in self.cache.children(&dir.path) {
            if !observed.contains(stale.path()) {
                debug!(path = %stale.path(), "evicting deleted entry");
                self.cache.remove_prefix(stale.path());
            }
        }

        let mut items = Vec::with_capacity(files.len() + dirs.len());
        for (name, child) in dirs {
            items.push(ListedItem {
                name,
                path: child.path.clone(),
                kind: ItemKind::Folder,
            });
            if let Some(Entry::File(_)) = self.cache.get(&child.path) {
                self.cache.remove(&child.path);
            }
            self.cache.insert_dir(child);
        }
        for (name, file) in files {
            items.push(ListedItem {
                name,
                path: file.path.clone(),
                kind: ItemKind::File,
            });
            self.cache.remove_prefix(&file.path);
            self.cache.insert_file(file);
        }
        Ok(items)
    }

    /// Recursive search below `under` for items whose name contains `needle`.
    pub async fn search_items_by_name(&self, needle: &str, under: &str) -> SvResult<Vec<ListedItem>> {
        let dir = self.resolve_directory(under).await?;
        let query = needle.to_string();
        let gathered = self
            .on_each_dir(&dir, |b, h| {
                let query = query.clone();
                async move { b.get_items_by_name(&query, &[h]).await }
            })
            .await;
        if gathered.ok_count() == 0 {
            return Err(gathered
                .into_all()
                .err()
                .unwrap_or_else(|| SvError::NotFound(dir.path.clone())));
        }

        let mut found: BTreeMap<String, ItemKind> = BTreeMap::new();
        for (tag, result) in gathered.results {
            let hits = match result {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(backend = %tag, error = %e, "search failed");
                    continue;
                }
            };
            for hit in hits {
                if hit.dirs.iter().any(|d| names::is_reserved(d)) || names::is_reserved(hit.item.name()) {
                    continue;
                }
                let (base, kind) = match &hit.item {
                    RemoteItem::File(f) => match names::parse_share_name(&f.name) {
                        Some((_, base)) => (base.to_string(), ItemKind::File),
                        None => continue,
                    },
                    RemoteItem::Folder(f) if !f.name.contains(names::SHARE_SEPARATOR) => {
                        (f.name.clone(), ItemKind::Folder)
                    }
                    RemoteItem::Folder(_) => continue,
                };
                if !base.contains(needle) {
                    continue;
                }
                let mut path = dir.path.clone();
                for d in &hit.dirs {
                    path = names::join(&path, d);
                }
                found.entry(names::join(&path, &base)).or_insert(kind);
            }
        }

        Ok(found
            .into_iter()
            .map(|(path, kind)| ListedItem {
                name: names::basename(&path),
                path,
                kind,
            })
            .collect())
    }
}

/// Find (or for private sessions, create) the session root on one backend.
async fn locate_root(b: &BackendRef, name: &str, kind: RootKind) -> SvResult<RemoteFolder> {
    match kind {
        RootKind::Private => b.get_session_folder(name).await,
        RootKind::Shared => b
            .list_shared_folders()
            .await?
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| SvError::NotFound(format!("shared folder {name} on {}", b.name()))),
    }
}
