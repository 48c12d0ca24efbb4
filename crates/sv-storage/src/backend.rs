//! The capability set every cloud backend provides to the session layer.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use sv_core::SvResult;

use crate::types::{NamedItem, RemoteFile, RemoteFolder, RemoteItem};

/// Shared handle to a backend singleton.
pub type BackendRef = Arc<dyn CloudBackend>;

/// One authenticated account on one object store.
///
/// Implementations must be safe to call concurrently. Name collisions are
/// resolved by the backend: `upload_file` overwrites, `create_folder` returns
/// the existing folder.
#[async_trait]
pub trait CloudBackend: Send + Sync + std::fmt::Debug {
    /// Identity tag written to `$META.order`
    fn name(&self) -> &str;

    fn email(&self) -> &str;

    fn is_authenticated(&self) -> bool;

    async fn authenticate_cloud(&self) -> SvResult<()>;

    async fn authenticate_by_token(&self, token: &str) -> SvResult<()>;

    /// Folder `name` under the application root, created if absent.
    async fn get_session_folder(&self, name: &str) -> SvResult<RemoteFolder>;

    /// Files directly inside `folder` whose name starts with `prefix`.
    async fn list_files(&self, folder: &RemoteFolder, prefix: &str) -> SvResult<Vec<RemoteFile>>;

    /// Direct children of `folder`. With `filter_reserved`, names starting
    /// with `$` are skipped.
    async fn get_children(
        &self,
        folder: &RemoteFolder,
        filter_reserved: bool,
    ) -> SvResult<Vec<RemoteItem>>;

    /// Recursive search for names containing `needle` below each folder.
    async fn get_items_by_name(
        &self,
        needle: &str,
        folders: &[RemoteFolder],
    ) -> SvResult<Vec<NamedItem>>;

    async fn upload_file(
        &self,
        data: Bytes,
        name: &str,
        parent: &RemoteFolder,
    ) -> SvResult<RemoteFile>;

    async fn download_file(&self, file: &RemoteFile) -> SvResult<Bytes>;

    async fn delete_file(&self, file: &RemoteFile) -> SvResult<()>;

    async fn delete_folder(&self, folder: &RemoteFolder) -> SvResult<()>;

    async fn rename_file(&self, file: &RemoteFile, new_name: &str) -> SvResult<RemoteFile>;

    async fn rename_folder(&self, folder: &RemoteFolder, new_name: &str) -> SvResult<RemoteFolder>;

    async fn create_folder(&self, name: &str, parent: &RemoteFolder) -> SvResult<RemoteFolder>;

    // ── sharing ──────────────────────────────────────────────────────────

    async fn share_folder(&self, folder: &RemoteFolder, emails: &[String]) -> SvResult<RemoteFolder>;

    async fn unshare_folder(&self, folder: &RemoteFolder) -> SvResult<()>;

    async fn unshare_by_email(&self, folder: &RemoteFolder, email: &str) -> SvResult<()>;

    async fn leave_shared_folder(&self, folder: &RemoteFolder) -> SvResult<()>;

    /// Member emails, or `None` when the folder is not shared.
    async fn get_members_shared(&self, folder: &RemoteFolder) -> SvResult<Option<Vec<String>>>;

    async fn get_owner(&self, folder: &RemoteFolder) -> SvResult<String>;

    /// Shared folders visible to this account, owned or joined.
    async fn list_shared_folders(&self) -> SvResult<Vec<RemoteFolder>>;

    /// The file named exactly `name` inside `folder`, if any.
    async fn get_file(&self, folder: &RemoteFolder, name: &str) -> SvResult<Option<RemoteFile>> {
        Ok(self
            .list_files(folder, name)
            .await?
            .into_iter()
            .find(|f| f.name == name))
    }
}
