//! Delete, rename, create, copy and move.
//!
//! Mutations fan out to every backend and only touch the path cache once
//! all of them succeeded; a partial failure leaves the entry for the next
//! listing to reconcile.

use sv_core::names::{self, ROOT};
use sv_core::{ListedItem, SvError, SvResult};
use tracing::{info, warn};

use crate::cache::{CloudFile, Directory, Entry};
use crate::session::Session;

impl Session {
    /// Delete every share of the file at `path`.
    pub async fn delete_file(&self, path: &str) -> SvResult<()> {
        let file = self.resolve_file(path).await?;
        let mut tasks = Vec::new();
        for (tag, j, remote) in file.present() {
            let Some(b) = self.backend(tag) else { continue };
            let remote = remote.clone();
            tasks.push(((tag.to_string(), j), async move { b.delete_file(&remote).await }));
        }
        let gathered = self.pool.gather(tasks).await;
        if gathered.all_ok {
            self.cache.remove(&file.path);
            info!(path = %file.path, "deleted");
            return Ok(());
        }

        // forget the shares that are gone so a retry only touches the rest
        let copies = self.splitter().copies_per_cloud();
        let mut remaining = file.clone();
        let mut first_error = None;
        for ((tag, j), result) in gathered.results {
            match result {
                Ok(()) => remaining.slots_mut(&tag, copies)[j] = None,
                Err(e) => {
                    warn!(path = %file.path, backend = %tag, error = %e, "share delete failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.cache.insert_file(remaining);
        Err(first_error.unwrap_or_else(|| SvError::NotFound(file.path.clone())))
    }

    /// Delete the folder at `path` and everything below it.
    pub async fn delete_folder(&self, path: &str) -> SvResult<()> {
        let path = names::normalize(path);
        if path == ROOT {
            return Err(SvError::InvalidName("cannot delete the session root".into()));
        }
        let dir = self.resolve_directory(&path).await?;
        let gathered = self
            .on_each_dir(&dir, |b, h| async move { b.delete_folder(&h).await })
            .await;
        if !gathered.all_ok {
            for (tag, e) in gathered.failures() {
                warn!(path = %path, backend = %tag, error = %e, "folder delete failed");
            }
            return Err(gathered
                .into_all()
                .err()
                .unwrap_or_else(|| SvError::NotFound(path.clone())));
        }
        let evicted = self.cache.remove_prefix(&path);
        info!(path = %path, evicted, "folder deleted");
        Ok(())
    }

    /// Create `name` inside `parent`. Every backend must succeed.
    pub async fn create_folder(&self, parent: &str, name: &str) -> SvResult<ListedItem> {
        names::validate_basename(name)?;
        let path = names::join(parent, name);
        if self.cache.get_file(&path).is_some() {
            return Err(SvError::AlreadyExists(path));
        }
        let dir = self.ensure_directory_with(&path, true).await?;
        Ok(Entry::Directory(dir).to_listed())
    }

    /// Rename the file or folder at `path` in place.
    pub async fn rename_item(&self, path: &str, new_name: &str) -> SvResult<ListedItem> {
        names::validate_basename(new_name)?;
        let path = names::normalize(path);
        if path == ROOT {
            return Err(SvError::InvalidName("cannot rename the session root".into()));
        }
        let entry = self.resolve(&path).await?;
        let new_path = names::join(&names::parent(&path), new_name);
        if new_path == path {
            return Ok(entry.to_listed());
        }
        // backends overwrite on rename, so the target must be checked against a fresh listing
        self.get_items_in_folder(&names::parent(&path)).await?;
        if self.cache.contains(&new_path) {
            return Err(SvError::AlreadyExists(new_path));
        }

        let renamed = match entry {
            Entry::File(file) => self.rename_shares(&file, new_name, &new_path).await?,
            Entry::Directory(dir) => {
                let target = new_name.to_string();
                let gathered = self
                    .on_each_dir(&dir, |b, h| {
                        let target = target.clone();
                        async move { b.rename_folder(&h, &target).await }
                    })
                    .await;
                if !gathered.all_ok {
                    self.cache.remove_prefix(&path);
                    return Err(gathered
                        .into_all()
                        .err()
                        .unwrap_or_else(|| SvError::NotFound(path.clone())));
                }
                let mut moved = Directory::new(&new_path);
                moved.handles = gathered.successes().map(|(t, f)| (t.clone(), f.clone())).collect();
                self.cache.remove_prefix(&path);
                Entry::Directory(moved)
            }
        };
        info!(from = %path, to = %new_path, "renamed");
        let listed = renamed.to_listed();
        self.cache.insert(renamed);
        Ok(listed)
    }

    async fn rename_shares(&self, file: &CloudFile, new_name: &str, new_path: &str) -> SvResult<Entry> {
        let copies = self.splitter().copies_per_cloud();
        let mut tasks = Vec::new();
        for (tag, j, remote) in file.present() {
            let Some(b) = self.backend(tag) else { continue };
            let remote = remote.clone();
            let object = names::share_name(j + 1, new_name);
            tasks.push(((tag.to_string(), j), async move { b.rename_file(&remote, &object).await }));
        }
        let gathered = self.pool.gather(tasks).await;
        if !gathered.all_ok {
            self.cache.remove(&file.path);
            return Err(gathered
                .into_all()
                .err()
                .unwrap_or_else(|| SvError::NotFound(file.path.clone())));
        }
        let mut renamed = CloudFile::new(new_path);
        for (tag, _) in &file.shares {
            renamed.slots_mut(tag, copies);
        }
        for ((tag, j), result) in gathered.results {
            if let Ok(remote) = result {
                renamed.slots_mut(&tag, copies)[j] = Some(remote);
            }
        }
        self.cache.remove(&file.path);
        Ok(Entry::File(renamed))
    }

    /// Copy `src` into `dest_dir`. A clashing name gets a `" (n)"` suffix.
    ///
    /// Returns the new path.
    pub async fn copy_item(&self, src: &str, dest_dir: &str) -> SvResult<String> {
        let (path, _) = self.copy_entry(src, dest_dir).await?;
        Ok(path)
    }

    /// The new path and whether every share of the copy was written.
    async fn copy_entry(&self, src: &str, dest_dir: &str) -> SvResult<(String, bool)> {
        let src = names::normalize(src);
        let dest_dir = names::normalize(dest_dir);
        if src == ROOT {
            return Err(SvError::InvalidName("cannot copy the session root".into()));
        }
        let entry = self.resolve(&src).await?;
        if matches!(entry, Entry::Directory(_)) && names::is_within(&dest_dir, &src) {
            return Err(SvError::InvalidName(format!("cannot copy {src} into itself")));
        }
        self.ensure_directory(&dest_dir).await?;
        self.get_items_in_folder(&dest_dir).await?;

        let base = names::basename(&src);
        let scope = format!("{}:{dest_dir}", self.name());
        let reservation = self
            .scratch
            .reserve(&scope, &base, |candidate| self.cache.contains(&names::join(&dest_dir, candidate)));
        let target_name = reservation.name().to_string();

        let complete = match entry {
            Entry::File(_) => {
                let data = self.download_bytes(&src).await?;
                let transfer = self.upload_bytes(&data, &dest_dir, &target_name).await?;
                transfer.all_ok()
            }
            Entry::Directory(_) => {
                let (staging, _staged) = self.scratch.reserve_scratch(&base);
                self.download_folder_to(&src, &staging, None).await?;
                let uploaded = self
                    .upload_folder_as(&staging, &dest_dir, &target_name, None)
                    .await;
                if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                    warn!(path = %staging.display(), error = %e, "could not clean staging folder");
                }
                uploaded?.all_ok()
            }
        };
        let new_path = names::join(&dest_dir, &target_name);
        info!(from = %src, to = %new_path, complete, "copied");
        Ok((new_path, complete))
    }

    /// Move `src` into `dest_dir`: copy, then delete the original.
    ///
    /// Moving within the same folder is a no-op. The original is kept if the
    /// copy did not reach every backend.
    pub async fn move_item(&self, src: &str, dest_dir: &str) -> SvResult<String> {
        let src = names::normalize(src);
        let dest_dir = names::normalize(dest_dir);
        if names::parent(&src) == dest_dir {
            return Ok(src);
        }
        let entry = self.resolve(&src).await?;
        let (new_path, complete) = self.copy_entry(&src, &dest_dir).await?;
        if !complete {
            return Err(SvError::BackendTransient {
                backend: "*".into(),
                message: format!("copy of {src} to {new_path} is incomplete; original kept"),
            });
        }
        match entry {
            Entry::File(_) => self.delete_file(&src).await?,
            Entry::Directory(_) => self.delete_folder(&src).await?,
        }
        info!(from = %src, to = %new_path, "moved");
        Ok(new_path)
    }
}
