//! Any OpenDAL operator as a cloud backend.
//!
//! Folder handles are key prefixes ending in `/`; file handles are full keys.
//! Object stores have no notion of accounts sharing a folder, so sharing
//! calls report `Unsupported` and every folder reads as unshared.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{ErrorKind, Operator};
use sv_core::names::{DELETED, RESERVED_PREFIX};
use sv_core::{SvError, SvResult};

use crate::backend::CloudBackend;
use crate::health::check_health;
use crate::types::{NamedItem, RemoteFile, RemoteFolder, RemoteItem};

#[derive(Debug)]
pub struct OpendalBackend {
    tag: String,
    email: String,
    op: Operator,
    hard_delete: bool,
    authenticated: AtomicBool,
}

impl OpendalBackend {
    pub fn new(tag: impl Into<String>, email: impl Into<String>, op: Operator) -> Self {
        Self {
            tag: tag.into(),
            email: email.into(),
            op,
            hard_delete: true,
            authenticated: AtomicBool::new(false),
        }
    }

    pub fn with_hard_delete(mut self, hard_delete: bool) -> Self {
        self.hard_delete = hard_delete;
        self
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn ready(&self) -> SvResult<()> {
        if !self.is_authenticated() {
            return Err(SvError::NotAuthenticated(self.tag.clone()));
        }
        Ok(())
    }

    fn map_err(&self, e: opendal::Error) -> SvError {
        match e.kind() {
            ErrorKind::NotFound => SvError::NotFound(e.to_string()),
            ErrorKind::AlreadyExists => SvError::AlreadyExists(e.to_string()),
            ErrorKind::Unsupported => SvError::unsupported(&self.tag, e.to_string()),
            ErrorKind::RateLimited => SvError::transient(&self.tag, e),
            _ if e.is_temporary() => SvError::transient(&self.tag, e),
            _ => SvError::fatal(&self.tag, e),
        }
    }

    async fn create_dir(&self, path: &str) -> SvResult<()> {
        match self.op.create_dir(path).await {
            Ok(()) => Ok(()),
            // some services materialize prefixes implicitly
            Err(e) if e.kind() == ErrorKind::Unsupported => Ok(()),
            Err(e) => Err(self.map_err(e)),
        }
    }

    /// Entries strictly below `prefix`, optionally recursive.
    async fn entries(&self, prefix: &str, recursive: bool) -> SvResult<Vec<opendal::Entry>> {
        let entries = self
            .op
            .list_with(prefix)
            .recursive(recursive)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(entries.into_iter().filter(|e| e.path() != prefix).collect())
    }

    async fn move_object(&self, from: &str, to: &str) -> SvResult<()> {
        let data = self.op.read(from).await.map_err(|e| self.map_err(e))?;
        self.op.write(to, data).await.map_err(|e| self.map_err(e))?;
        self.op.delete(from).await.map_err(|e| self.map_err(e))
    }

    async fn move_tree(&self, from: &str, to: &str) -> SvResult<()> {
        self.create_dir(to).await?;
        for entry in self.entries(from, true).await? {
            let rel = &entry.path()[from.len()..];
            let target = format!("{to}{rel}");
            if entry.metadata().is_dir() {
                self.create_dir(&target).await?;
            } else {
                self.move_object(entry.path(), &target).await?;
            }
        }
        self.remove_tree(from).await
    }

    async fn remove_tree(&self, prefix: &str) -> SvResult<()> {
        let mut entries = self.entries(prefix, true).await?;
        // deepest first so directories are empty when removed
        entries.sort_by_key(|e| std::cmp::Reverse(e.path().len()));
        for entry in entries {
            self.op
                .delete(entry.path())
                .await
                .map_err(|e| self.map_err(e))?;
        }
        self.op.delete(prefix).await.map_err(|e| self.map_err(e))
    }

    /// `$DELETED/` inside the session folder holding `path`.
    async fn recycle_bin(&self, path: &str) -> SvResult<String> {
        let session = path.split('/').next().unwrap_or_default();
        let bin = format!("{session}/{DELETED}/");
        self.create_dir(&bin).await?;
        Ok(bin)
    }
}

fn entry_name(entry: &opendal::Entry) -> String {
    entry.name().trim_end_matches('/').to_string()
}

fn folder_at(path: String, parent: Option<String>) -> RemoteFolder {
    let name = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    RemoteFolder {
        id: path,
        name,
        parent,
    }
}

fn parent_of(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => trimmed[..=i].to_string(),
        None => "/".to_string(),
    }
}

#[async_trait]
impl CloudBackend for OpendalBackend {
    fn name(&self) -> &str {
        &self.tag
    }

    fn email(&self) -> &str {
        &self.email
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn authenticate_cloud(&self) -> SvResult<()> {
        check_health(&self.tag, &self.op).await?;
        self.authenticated.store(true, Ordering::SeqCst);
        tracing::info!(backend = %self.tag, scheme = %self.op.info().scheme(), "object store reachable");
        Ok(())
    }

    async fn authenticate_by_token(&self, _token: &str) -> SvResult<()> {
        Err(SvError::unsupported(&self.tag, "authenticate_by_token"))
    }

    async fn get_session_folder(&self, name: &str) -> SvResult<RemoteFolder> {
        self.ready()?;
        let path = format!("{name}/");
        self.create_dir(&path).await?;
        Ok(folder_at(path, Some("/".into())))
    }

    async fn list_files(&self, folder: &RemoteFolder, prefix: &str) -> SvResult<Vec<RemoteFile>> {
        self.ready()?;
        Ok(self
            .entries(&folder.id, false)
            .await?
            .into_iter()
            .filter(|e| !e.metadata().is_dir() && e.name().starts_with(prefix))
            .map(|e| RemoteFile {
                id: e.path().to_string(),
                name: entry_name(&e),
                parent: folder.id.clone(),
                size: e.metadata().content_length(),
            })
            .collect())
    }

    async fn get_children(
        &self,
        folder: &RemoteFolder,
        filter_reserved: bool,
    ) -> SvResult<Vec<RemoteItem>> {
        self.ready()?;
        Ok(self
            .entries(&folder.id, false)
            .await?
            .into_iter()
            .filter(|e| !(filter_reserved && e.name().starts_with(RESERVED_PREFIX)))
            .map(|e| {
                if e.metadata().is_dir() {
                    RemoteItem::Folder(folder_at(e.path().to_string(), Some(folder.id.clone())))
                } else {
                    RemoteItem::File(RemoteFile {
                        id: e.path().to_string(),
                        name: entry_name(&e),
                        parent: folder.id.clone(),
                        size: e.metadata().content_length(),
                    })
                }
            })
            .collect())
    }

    async fn get_items_by_name(
        &self,
        needle: &str,
        folders: &[RemoteFolder],
    ) -> SvResult<Vec<NamedItem>> {
        self.ready()?;
        let mut hits = Vec::new();
        for folder in folders {
            for entry in self.entries(&folder.id, true).await? {
                let name = entry_name(&entry);
                if !name.contains(needle) {
                    continue;
                }
                let rel = entry.path()[folder.id.len()..].trim_end_matches('/');
                let mut dirs: Vec<String> = rel.split('/').map(str::to_string).collect();
                dirs.pop();
                let path = entry.path().to_string();
                let item = if entry.metadata().is_dir() {
                    RemoteItem::Folder(folder_at(path.clone(), Some(parent_of(&path))))
                } else {
                    RemoteItem::File(RemoteFile {
                        parent: parent_of(&path),
                        id: path,
                        name,
                        size: entry.metadata().content_length(),
                    })
                };
                hits.push(NamedItem { dirs, item });
            }
        }
        Ok(hits)
    }

    async fn upload_file(
        &self,
        data: Bytes,
        name: &str,
        parent: &RemoteFolder,
    ) -> SvResult<RemoteFile> {
        self.ready()?;
        let path = format!("{}{name}", parent.id);
        let size = data.len() as u64;
        self.op
            .write(&path, data)
            .await
            .map_err(|e| self.map_err(e))?;
        tracing::debug!(backend = %self.tag, path = %path, bytes = size, "object written");
        Ok(RemoteFile {
            id: path,
            name: name.to_string(),
            parent: parent.id.clone(),
            size,
        })
    }

    async fn download_file(&self, file: &RemoteFile) -> SvResult<Bytes> {
        self.ready()?;
        let buf = self.op.read(&file.id).await.map_err(|e| self.map_err(e))?;
        Ok(buf.to_bytes())
    }

    async fn delete_file(&self, file: &RemoteFile) -> SvResult<()> {
        self.ready()?;
        if self.hard_delete {
            return self.op.delete(&file.id).await.map_err(|e| self.map_err(e));
        }
        let bin = self.recycle_bin(&file.id).await?;
        self.move_object(&file.id, &format!("{bin}{}", file.name)).await
    }

    async fn delete_folder(&self, folder: &RemoteFolder) -> SvResult<()> {
        self.ready()?;
        if self.hard_delete {
            return self.remove_tree(&folder.id).await;
        }
        let bin = self.recycle_bin(&folder.id).await?;
        self.move_tree(&folder.id, &format!("{bin}{}/", folder.name)).await
    }

    async fn rename_file(&self, file: &RemoteFile, new_name: &str) -> SvResult<RemoteFile> {
        self.ready()?;
        let target = format!("{}{new_name}", file.parent);
        self.move_object(&file.id, &target).await?;
        Ok(RemoteFile {
            id: target,
            name: new_name.to_string(),
            parent: file.parent.clone(),
            size: file.size,
        })
    }

    async fn rename_folder(&self, folder: &RemoteFolder, new_name: &str) -> SvResult<RemoteFolder> {
        self.ready()?;
        let parent = parent_of(&folder.id);
        let base = if parent == "/" { String::new() } else { parent.clone() };
        let target = format!("{base}{new_name}/");
        if self.op.exists(&target).await.map_err(|e| self.map_err(e))? {
            return Err(SvError::AlreadyExists(target));
        }
        self.move_tree(&folder.id, &target).await?;
        Ok(folder_at(target, Some(parent)))
    }

    async fn create_folder(&self, name: &str, parent: &RemoteFolder) -> SvResult<RemoteFolder> {
        self.ready()?;
        let path = format!("{}{name}/", parent.id);
        self.create_dir(&path).await?;
        Ok(folder_at(path, Some(parent.id.clone())))
    }

    // ── sharing ──────────────────────────────────────────────────────────

    async fn share_folder(&self, _folder: &RemoteFolder, _emails: &[String]) -> SvResult<RemoteFolder> {
        Err(SvError::unsupported(&self.tag, "share_folder"))
    }

    async fn unshare_folder(&self, _folder: &RemoteFolder) -> SvResult<()> {
        Err(SvError::unsupported(&self.tag, "unshare_folder"))
    }

    async fn unshare_by_email(&self, _folder: &RemoteFolder, _email: &str) -> SvResult<()> {
        Err(SvError::unsupported(&self.tag, "unshare_by_email"))
    }

    async fn leave_shared_folder(&self, _folder: &RemoteFolder) -> SvResult<()> {
        Err(SvError::unsupported(&self.tag, "leave_shared_folder"))
    }

    async fn get_members_shared(&self, _folder: &RemoteFolder) -> SvResult<Option<Vec<String>>> {
        Ok(None)
    }

    async fn get_owner(&self, _folder: &RemoteFolder) -> SvResult<String> {
        Ok(self.email.clone())
    }

    async fn list_shared_folders(&self) -> SvResult<Vec<RemoteFolder>> {
        Ok(Vec::new())
    }
}
