//! Upload, download and repair of split files.
//!
//! Upload: encrypt -> split into M groups -> one object per share named
//! `{index}#{basename}` in the target folder of the matching backend.
//! Download fetches every known share, merges whatever arrived and decrypts.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use serde::Serialize;
use sv_core::names::{self, ROOT};
use sv_core::{ItemKind, SvError, SvResult};
use sv_split::SplitKind;
use tracing::{debug, info, warn};

use crate::cache::CloudFile;
use crate::session::{Session, Snapshot};

/// Progress callback: (units done, units total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Result of uploading one file.
#[derive(Debug, Clone, Serialize)]
pub struct Transfer {
    pub path: String,
    pub bytes: u64,
    pub shares_written: usize,
    pub shares_expected: usize,
    /// `(backend, error)` for every share that was not written
    pub failed: Vec<(String, String)>,
}

impl Transfer {
    /// Every backend received its share.
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of uploading a local directory tree.
#[derive(Debug, Default, Serialize)]
pub struct FolderTransfer {
    pub root: String,
    pub files: Vec<Transfer>,
    /// `(local path, error)` for files that could not be uploaded at all
    pub failed: Vec<(PathBuf, String)>,
    pub bytes: u64,
}

impl FolderTransfer {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty() && self.files.iter().all(Transfer::all_ok)
    }
}

/// Result of re-uploading missing shares of a file.
#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub path: String,
    /// Shares present before the repair
    pub present: usize,
    pub expected: usize,
    /// Backends that received a share
    pub rewritten: Vec<String>,
}

/// Collect every regular file below `root`, skipping names matching
/// `excludes`. Sorted for deterministic upload order.
pub fn collect_files(root: &Path, excludes: &[glob::Pattern]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files_inner(root, &mut files, excludes)?;
    files.sort();
    Ok(files)
}

fn collect_files_inner(dir: &Path, out: &mut Vec<PathBuf>, excludes: &[glob::Pattern]) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading dir: {}", dir.display()))? {
        let entry = entry.context("reading dir entry")?;
        let path = entry.path();
        let meta = entry.metadata().context("stat dir entry")?;

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "skipping non UTF-8 name");
            continue;
        };
        if excludes.iter().any(|p| p.matches(name)) {
            continue;
        }
        if meta.is_dir() {
            collect_files_inner(&path, out, excludes)?;
        } else if meta.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn local_name(path: &Path) -> SvResult<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| SvError::InvalidName(path.display().to_string()))
}

impl Session {
    // ── upload ───────────────────────────────────────────────────────────

    /// Encrypt, split and store `data` as `dir_path/name`.
    ///
    /// Succeeds if at least one share was written; the returned
    /// [`Transfer`] names the backends that were missed.
    pub async fn upload_bytes(&self, data: &[u8], dir_path: &str, name: &str) -> SvResult<Transfer> {
        names::validate_basename(name)?;
        let dir_path = names::normalize(dir_path);
        let path = names::join(&dir_path, name);
        if self.cache.contains(&path) {
            return Err(SvError::AlreadyExists(path));
        }
        let dir = self.ensure_directory(&dir_path).await?;

        let snap = self.snapshot();
        let sealed = snap.cipher.encrypt(data)?;
        let groups = snap.splitter.split(&sealed, snap.m())?;
        let copies = snap.splitter.copies_per_cloud();

        let mut tasks = Vec::new();
        let mut failed = Vec::new();
        for (tag, group) in snap.order.iter().zip(groups) {
            for (j, share) in group.into_iter().enumerate() {
                match (self.backend(tag), dir.handle(tag)) {
                    (Some(b), Some(h)) => {
                        let h = h.clone();
                        let object = names::share_name(j + 1, name);
                        tasks.push(((tag.clone(), j), async move { b.upload_file(share, &object, &h).await }));
                    }
                    _ => failed.push((tag.clone(), format!("no handle for {dir_path}"))),
                }
            }
        }
        let expected = tasks.len() + failed.len();
        let gathered = self.pool.gather(tasks).await;

        let mut file = CloudFile::new(&path);
        for tag in &snap.order {
            file.slots_mut(tag, copies);
        }
        let mut first_error = None;
        for ((tag, j), result) in gathered.results {
            match result {
                Ok(remote) => file.slots_mut(&tag, copies)[j] = Some(remote),
                Err(e) => {
                    warn!(path = %path, backend = %tag, error = %e, "share upload failed");
                    failed.push((tag, e.to_string()));
                    first_error.get_or_insert(e);
                }
            }
        }

        let written = file.share_count();
        if written == 0 {
            return Err(first_error.unwrap_or_else(|| {
                SvError::NotFound(format!("no backend holds {dir_path}"))
            }));
        }
        info!(path = %path, bytes = data.len(), shares = written, expected, "uploaded");
        self.cache.insert_file(file);
        Ok(Transfer {
            path,
            bytes: data.len() as u64,
            shares_written: written,
            shares_expected: expected,
            failed,
        })
    }

    /// Upload a local file into `dir_path`, under `name` or its own name.
    pub async fn upload_file(&self, local: &Path, dir_path: &str, name: Option<&str>) -> SvResult<Transfer> {
        let name = match name {
            Some(n) => n.to_string(),
            None => local_name(local)?,
        };
        let data = tokio::fs::read(local).await?;
        self.upload_bytes(&data, dir_path, &name).await
    }

    /// Upload a local directory tree as `dir_path/<local dir name>`.
    pub async fn upload_folder(
        &self,
        local: &Path,
        dir_path: &str,
        progress: Option<&ProgressFn>,
    ) -> SvResult<FolderTransfer> {
        let name = local_name(local)?;
        self.upload_folder_as(local, dir_path, &name, progress).await
    }

    pub(crate) async fn upload_folder_as(
        &self,
        local: &Path,
        dir_path: &str,
        name: &str,
        progress: Option<&ProgressFn>,
    ) -> SvResult<FolderTransfer> {
        names::validate_basename(name)?;
        let remote_root = names::join(dir_path, name);
        if self.cache.contains(&remote_root) {
            return Err(SvError::AlreadyExists(remote_root));
        }
        let files = collect_files(local, &self.excludes)?;
        self.ensure_directory(&remote_root).await?;

        let total = files.len();
        let mut result = FolderTransfer {
            root: remote_root.clone(),
            ..Default::default()
        };
        for (i, path) in files.iter().enumerate() {
            let rel = path.strip_prefix(local).unwrap_or(path);
            if let Some(cb) = progress {
                cb(i as u64, total as u64, &format!("[{}/{}] {}", i + 1, total, rel.display()));
            }

            let mut remote_dir = remote_root.clone();
            if let Some(parent) = rel.parent() {
                for component in parent.iter() {
                    remote_dir = names::join(&remote_dir, &component.to_string_lossy());
                }
            }
            match self.upload_file(path, &remote_dir, None).await {
                Ok(t) => {
                    result.bytes += t.bytes;
                    result.files.push(t);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "upload failed");
                    result.failed.push((path.clone(), e.to_string()));
                }
            }
        }
        if let Some(cb) = progress {
            cb(total as u64, total as u64, "done");
        }
        info!(
            root = %remote_root,
            files = result.files.len(),
            failed = result.failed.len(),
            bytes = result.bytes,
            "folder uploaded"
        );
        Ok(result)
    }

    // ── download ─────────────────────────────────────────────────────────

    /// Fetch every known share of `file` into order-aligned groups.
    async fn fetch_shares(&self, file: &CloudFile, snap: &Snapshot) -> Vec<Vec<Option<Bytes>>> {
        let copies = snap.splitter.copies_per_cloud();
        let mut tasks = Vec::new();
        for (tag, j, remote) in file.present() {
            if snap.position(tag).is_none() {
                debug!(path = %file.path, backend = %tag, "share on inactive backend ignored");
                continue;
            }
            let Some(b) = self.backend(tag) else { continue };
            let remote = remote.clone();
            tasks.push(((tag.to_string(), j), async move { b.download_file(&remote).await }));
        }
        let gathered = self.pool.gather(tasks).await;

        let mut groups: Vec<Vec<Option<Bytes>>> = vec![vec![None; copies]; snap.m()];
        for ((tag, j), result) in gathered.results {
            match result {
                Ok(bytes) => {
                    if let Some(i) = snap.position(&tag) {
                        groups[i][j] = Some(bytes);
                    }
                }
                Err(e) => warn!(path = %file.path, backend = %tag, error = %e, "share download failed"),
            }
        }
        groups
    }

    /// Reassemble and decrypt the file at `path`.
    pub async fn download_bytes(&self, path: &str) -> SvResult<Vec<u8>> {
        let file = self.resolve_file(path).await?;
        let snap = self.snapshot();
        let groups = self.fetch_shares(&file, &snap).await;
        let sealed = snap.splitter.merge(&groups, snap.m())?;
        let plain = snap.cipher.decrypt(&sealed)?;
        debug!(path = %file.path, bytes = plain.len(), "downloaded");
        Ok(plain)
    }

    /// Download `path` into local `dest_dir` under a name that does not
    /// exist there yet.
    pub async fn download_file(&self, path: &str, dest_dir: &Path) -> SvResult<PathBuf> {
        let data = self.download_bytes(path).await?;
        tokio::fs::create_dir_all(dest_dir).await?;
        let (target, _reservation) = self.scratch.reserve_local(dest_dir, &names::basename(path));
        tokio::fs::write(&target, &data).await?;
        info!(path = %path, local = %target.display(), "saved");
        Ok(target)
    }

    /// Decrypt `path` into scratch space and return the local copy.
    pub async fn open_file(&self, path: &str) -> SvResult<PathBuf> {
        let data = self.download_bytes(path).await?;
        let (target, _reservation) = self.scratch.reserve_scratch(&names::basename(path));
        tokio::fs::write(&target, &data).await?;
        Ok(target)
    }

    /// Download the folder at `path` into `dest_dir` under a fresh name.
    pub async fn download_folder(
        &self,
        path: &str,
        dest_dir: &Path,
        progress: Option<&ProgressFn>,
    ) -> SvResult<PathBuf> {
        let path = names::normalize(path);
        let base = if path == ROOT {
            self.name().to_string()
        } else {
            names::basename(&path)
        };
        tokio::fs::create_dir_all(dest_dir).await?;
        let (target, _reservation) = self.scratch.reserve_local(dest_dir, &base);
        self.download_folder_to(&path, &target, progress).await?;
        Ok(target)
    }

    /// Download the folder at `path` into exactly `target`.
    pub(crate) async fn download_folder_to(
        &self,
        path: &str,
        target: &Path,
        progress: Option<&ProgressFn>,
    ) -> SvResult<()> {
        let mut pending = vec![(names::normalize(path), target.to_path_buf())];
        let mut files = Vec::new();
        while let Some((remote, local)) = pending.pop() {
            tokio::fs::create_dir_all(&local).await?;
            for item in self.get_items_in_folder(&remote).await? {
                let local_item = local.join(&item.name);
                match item.kind {
                    ItemKind::Folder => pending.push((item.path, local_item)),
                    ItemKind::File => files.push((item.path, local_item)),
                }
            }
        }

        let total = files.len() as u64;
        for (i, (remote, local)) in files.into_iter().enumerate() {
            if let Some(cb) = progress {
                cb(i as u64, total, &remote);
            }
            let data = self.download_bytes(&remote).await?;
            tokio::fs::write(&local, &data).await?;
        }
        if let Some(cb) = progress {
            cb(total, total, "done");
        }
        Ok(())
    }

    // ── repair ───────────────────────────────────────────────────────────

    /// Rewrite missing shares of `path` from the ones that remain.
    ///
    /// Replicated files only get their missing copies; Shamir files are
    /// re-split and every share is replaced, since shares of different
    /// splits cannot be combined.
    pub async fn repair_file(&self, path: &str) -> SvResult<RepairReport> {
        let file = self.resolve_file(path).await?;
        let snap = self.snapshot();
        let copies = snap.splitter.copies_per_cloud();
        let groups = self.fetch_shares(&file, &snap).await;
        let present = groups.iter().flatten().filter(|s| s.is_some()).count();
        let expected = snap.m() * copies;
        let mut report = RepairReport {
            path: file.path.clone(),
            present,
            expected,
            rewritten: Vec::new(),
        };
        if present == expected {
            return Ok(report);
        }

        let sealed = snap.splitter.merge(&groups, snap.m())?;
        snap.cipher.decrypt(&sealed)?;
        let fresh = snap.splitter.split(&sealed, snap.m())?;
        let dir = self.resolve_directory(&names::parent(&file.path)).await?;
        let base = names::basename(&file.path);
        let replace_all = snap.splitter.kind() == SplitKind::Shamir;

        let mut tasks = Vec::new();
        for (i, (tag, group)) in snap.order.iter().zip(fresh).enumerate() {
            let (Some(b), Some(h)) = (self.backend(tag), dir.handle(tag).cloned()) else {
                warn!(path = %file.path, backend = %tag, "cannot repair share without a folder handle");
                continue;
            };
            for (j, share) in group.into_iter().enumerate() {
                if !replace_all && groups[i][j].is_some() {
                    continue;
                }
                let old = file.slots(tag).and_then(|s| s.get(j).cloned().flatten());
                let object = names::share_name(j + 1, &base);
                let b = b.clone();
                let h = h.clone();
                tasks.push(((tag.clone(), j), async move {
                    if let Some(old) = old {
                        match b.delete_file(&old).await {
                            Ok(()) => {}
                            Err(e) if e.is_not_found() => {}
                            Err(e) => return Err(e),
                        }
                    }
                    b.upload_file(share, &object, &h).await
                }));
            }
        }
        let gathered = self.pool.gather(tasks).await;

        let mut repaired = file.clone();
        let mut first_error = None;
        for ((tag, j), result) in gathered.results {
            match result {
                Ok(remote) => {
                    repaired.slots_mut(&tag, copies)[j] = Some(remote);
                    report.rewritten.push(tag);
                }
                Err(e) => {
                    warn!(path = %file.path, backend = %tag, error = %e, "share repair failed");
                    repaired.slots_mut(&tag, copies)[j] = None;
                    first_error.get_or_insert(e);
                }
            }
        }
        self.cache.insert_file(repaired);
        if let Some(e) = first_error {
            return Err(e);
        }
        info!(path = %file.path, rewritten = ?report.rewritten, "repaired");
        Ok(report)
    }
}
