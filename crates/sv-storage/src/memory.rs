//! A process-local simulated cloud.
//!
//! One [`MemoryCloud`] plays a whole provider: every account gets its own
//! root, folders can be shared between accounts, and items deleted from a
//! backend without hard-delete land in a `$DELETED` folder. A
//! [`MemoryBackend`] is one account's authenticated view of a cloud.
//! Backends can be switched offline to inject transient failures.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sv_core::names::{DELETED, RESERVED_PREFIX};
use sv_core::{SvError, SvResult};

use crate::backend::CloudBackend;
use crate::types::{NamedItem, RemoteFile, RemoteFolder, RemoteItem};

#[derive(Debug, Clone)]
enum Body {
    File(Bytes),
    Folder {
        /// `Some` once the folder is shared; the owner is not listed
        members: Option<BTreeSet<String>>,
    },
}

#[derive(Debug, Clone)]
struct Node {
    id: String,
    name: String,
    parent: Option<String>,
    owner: String,
    body: Body,
}

impl Node {
    fn is_folder(&self) -> bool {
        matches!(self.body, Body::Folder { .. })
    }

    fn to_file(&self) -> RemoteFile {
        let size = match &self.body {
            Body::File(data) => data.len() as u64,
            Body::Folder { .. } => 0,
        };
        RemoteFile {
            id: self.id.clone(),
            name: self.name.clone(),
            parent: self.parent.clone().unwrap_or_default(),
            size,
        }
    }

    fn to_folder(&self) -> RemoteFolder {
        RemoteFolder {
            id: self.id.clone(),
            name: self.name.clone(),
            parent: self.parent.clone(),
        }
    }

    fn to_item(&self) -> RemoteItem {
        if self.is_folder() {
            RemoteItem::Folder(self.to_folder())
        } else {
            RemoteItem::File(self.to_file())
        }
    }
}

#[derive(Debug, Default)]
struct CloudState {
    nodes: HashMap<String, Node>,
    /// email -> root folder id
    roots: HashMap<String, String>,
    next_id: u64,
}

impl CloudState {
    fn alloc_id(&mut self, label: &str) -> String {
        self.next_id += 1;
        format!("{label}:{}", self.next_id)
    }

    fn root_of(&mut self, label: &str, email: &str) -> String {
        if let Some(id) = self.roots.get(email) {
            return id.clone();
        }
        let id = self.alloc_id(label);
        self.nodes.insert(
            id.clone(),
            Node {
                id: id.clone(),
                name: String::new(),
                parent: None,
                owner: email.to_string(),
                body: Body::Folder { members: None },
            },
        );
        self.roots.insert(email.to_string(), id.clone());
        id
    }

    /// Whether `email` reaches node `id` through its own root or a folder
    /// shared with it.
    fn accessible(&self, email: &str, id: &str) -> bool {
        let mut cursor = self.nodes.get(id);
        while let Some(node) = cursor {
            if let Body::Folder {
                members: Some(members),
            } = &node.body
            {
                if node.owner == email || members.contains(email) {
                    return true;
                }
            }
            match &node.parent {
                Some(parent) => cursor = self.nodes.get(parent),
                None => return self.roots.get(email) == Some(&node.id),
            }
        }
        false
    }

    fn get(&self, email: &str, id: &str) -> SvResult<&Node> {
        match self.nodes.get(id) {
            Some(node) if self.accessible(email, id) => Ok(node),
            _ => Err(SvError::NotFound(id.to_string())),
        }
    }

    fn get_folder(&self, email: &str, id: &str) -> SvResult<&Node> {
        let node = self.get(email, id)?;
        if !node.is_folder() {
            return Err(SvError::NotFound(format!("{id} is not a folder")));
        }
        Ok(node)
    }

    fn children<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |n| n.parent.as_deref() == Some(parent))
    }

    fn child_named<'a>(&'a self, parent: &'a str, name: &str) -> Option<&'a Node> {
        self.children(parent).find(|n| n.name == name)
    }

    fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = vec![id.to_string()];
        let mut i = 0;
        while i < out.len() {
            let current = out[i].clone();
            out.extend(self.children(&current).map(|n| n.id.clone()));
            i += 1;
        }
        out
    }

    /// The folder directly below an account root that contains `id`.
    fn top_folder(&self, id: &str) -> Option<&Node> {
        let mut cursor = self.nodes.get(id)?;
        loop {
            let parent = self.nodes.get(cursor.parent.as_deref()?)?;
            if parent.parent.is_none() {
                return Some(cursor);
            }
            cursor = parent;
        }
    }
}

/// A simulated provider shared by any number of accounts.
#[derive(Debug)]
pub struct MemoryCloud {
    label: String,
    state: RwLock<CloudState>,
}

impl MemoryCloud {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            state: RwLock::new(CloudState::default()),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Total number of stored objects and folders, roots included.
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }
}

/// One account's view of a [`MemoryCloud`].
#[derive(Debug)]
pub struct MemoryBackend {
    tag: String,
    email: String,
    cloud: Arc<MemoryCloud>,
    hard_delete: bool,
    authenticated: AtomicBool,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new(tag: impl Into<String>, email: impl Into<String>, cloud: Arc<MemoryCloud>) -> Self {
        Self {
            tag: tag.into(),
            email: email.into(),
            cloud,
            hard_delete: true,
            authenticated: AtomicBool::new(false),
            offline: AtomicBool::new(false),
        }
    }

    /// Move deleted items to `$DELETED` instead of dropping them.
    pub fn with_hard_delete(mut self, hard_delete: bool) -> Self {
        self.hard_delete = hard_delete;
        self
    }

    pub fn cloud(&self) -> &Arc<MemoryCloud> {
        &self.cloud
    }

    /// While offline every call fails with `BackendTransient`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn online(&self) -> SvResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SvError::transient(&self.tag, "backend unreachable"));
        }
        Ok(())
    }

    fn ready(&self) -> SvResult<()> {
        self.online()?;
        if !self.is_authenticated() {
            return Err(SvError::NotAuthenticated(self.tag.clone()));
        }
        Ok(())
    }

    fn require_owner(&self, node: &Node, operation: &str) -> SvResult<()> {
        if node.owner != self.email {
            return Err(SvError::fatal(
                &self.tag,
                format!("{operation}: {} is owned by {}", node.name, node.owner),
            ));
        }
        Ok(())
    }

    /// Drop `id` and everything below it, or move it to the recycle bin.
    fn remove(&self, state: &mut CloudState, id: &str) {
        if self.hard_delete {
            for gone in state.descendants(id) {
                state.nodes.remove(&gone);
            }
            return;
        }

        let top = state.top_folder(id).map(|n| n.id.clone());
        let bin_parent = match top {
            Some(top) if top != id => top,
            _ => state.root_of(&self.cloud.label, &self.email),
        };
        let existing = state.child_named(&bin_parent, DELETED).map(|n| n.id.clone());
        let bin = match existing {
            Some(bin) => bin,
            None => {
                let bin = state.alloc_id(&self.cloud.label);
                state.nodes.insert(
                    bin.clone(),
                    Node {
                        id: bin.clone(),
                        name: DELETED.to_string(),
                        parent: Some(bin_parent),
                        owner: self.email.clone(),
                        body: Body::Folder { members: None },
                    },
                );
                bin
            }
        };
        if let Some(node) = state.nodes.get_mut(id) {
            node.parent = Some(bin);
        }
    }
}

#[async_trait]
impl CloudBackend for MemoryBackend {
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
        self.online()?;
        self.cloud.state.write().root_of(&self.cloud.label, &self.email);
        self.authenticated.store(true, Ordering::SeqCst);
        tracing::debug!(backend = %self.tag, email = %self.email, "memory backend authenticated");
        Ok(())
    }

    async fn authenticate_by_token(&self, token: &str) -> SvResult<()> {
        if token.trim().is_empty() {
            return Err(SvError::NotAuthenticated(format!("{}: empty token", self.tag)));
        }
        self.authenticate_cloud().await
    }

    async fn get_session_folder(&self, name: &str) -> SvResult<RemoteFolder> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        let root = state.root_of(&self.cloud.label, &self.email);
        if let Some(existing) = state.child_named(&root, name) {
            if existing.is_folder() {
                return Ok(existing.to_folder());
            }
            return Err(SvError::AlreadyExists(name.to_string()));
        }
        let id = state.alloc_id(&self.cloud.label);
        let node = Node {
            id: id.clone(),
            name: name.to_string(),
            parent: Some(root),
            owner: self.email.clone(),
            body: Body::Folder { members: None },
        };
        let folder = node.to_folder();
        state.nodes.insert(id, node);
        Ok(folder)
    }

    async fn list_files(&self, folder: &RemoteFolder, prefix: &str) -> SvResult<Vec<RemoteFile>> {
        self.ready()?;
        let state = self.cloud.state.read();
        state.get_folder(&self.email, &folder.id)?;
        Ok(state
            .children(&folder.id)
            .filter(|n| !n.is_folder() && n.name.starts_with(prefix))
            .map(Node::to_file)
            .collect())
    }

    async fn get_children(
        &self,
        folder: &RemoteFolder,
        filter_reserved: bool,
    ) -> SvResult<Vec<RemoteItem>> {
        self.ready()?;
        let state = self.cloud.state.read();
        state.get_folder(&self.email, &folder.id)?;
        Ok(state
            .children(&folder.id)
            .filter(|n| !(filter_reserved && n.name.starts_with(RESERVED_PREFIX)))
            .map(Node::to_item)
            .collect())
    }

    async fn get_items_by_name(
        &self,
        needle: &str,
        folders: &[RemoteFolder],
    ) -> SvResult<Vec<NamedItem>> {
        self.ready()?;
        let state = self.cloud.state.read();
        let mut hits = Vec::new();
        for folder in folders {
            state.get_folder(&self.email, &folder.id)?;
            let mut stack = vec![(folder.id.clone(), Vec::<String>::new())];
            while let Some((id, dirs)) = stack.pop() {
                for child in state.children(&id) {
                    if child.name.contains(needle) {
                        hits.push(NamedItem {
                            dirs: dirs.clone(),
                            item: child.to_item(),
                        });
                    }
                    if child.is_folder() {
                        let mut below = dirs.clone();
                        below.push(child.name.clone());
                        stack.push((child.id.clone(), below));
                    }
                }
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
        let mut state = self.cloud.state.write();
        state.get_folder(&self.email, &parent.id)?;

        let existing = state
            .child_named(&parent.id, name)
            .map(|n| (n.id.clone(), n.is_folder()));
        match existing {
            Some((_, true)) => Err(SvError::AlreadyExists(name.to_string())),
            Some((id, false)) => {
                let node = state
                    .nodes
                    .get_mut(&id)
                    .ok_or_else(|| SvError::NotFound(id.clone()))?;
                node.body = Body::File(data);
                Ok(node.to_file())
            }
            None => {
                let id = state.alloc_id(&self.cloud.label);
                let node = Node {
                    id: id.clone(),
                    name: name.to_string(),
                    parent: Some(parent.id.clone()),
                    owner: self.email.clone(),
                    body: Body::File(data),
                };
                let file = node.to_file();
                state.nodes.insert(id, node);
                Ok(file)
            }
        }
    }

    async fn download_file(&self, file: &RemoteFile) -> SvResult<Bytes> {
        self.ready()?;
        let state = self.cloud.state.read();
        match &state.get(&self.email, &file.id)?.body {
            Body::File(data) => Ok(data.clone()),
            Body::Folder { .. } => Err(SvError::NotFound(format!("{} is a folder", file.name))),
        }
    }

    async fn delete_file(&self, file: &RemoteFile) -> SvResult<()> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        state.get(&self.email, &file.id)?;
        self.remove(&mut state, &file.id);
        Ok(())
    }

    async fn delete_folder(&self, folder: &RemoteFolder) -> SvResult<()> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        let node = state.get_folder(&self.email, &folder.id)?;
        if node.parent.is_none() {
            return Err(SvError::fatal(&self.tag, "cannot delete the account root"));
        }
        self.remove(&mut state, &folder.id);
        Ok(())
    }

    async fn rename_file(&self, file: &RemoteFile, new_name: &str) -> SvResult<RemoteFile> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        let parent = state
            .get(&self.email, &file.id)?
            .parent
            .clone()
            .unwrap_or_default();
        let clobbered = state
            .child_named(&parent, new_name)
            .filter(|n| n.id != file.id)
            .map(|n| (n.id.clone(), n.is_folder()));
        match clobbered {
            Some((_, true)) => return Err(SvError::AlreadyExists(new_name.to_string())),
            Some((id, false)) => {
                state.nodes.remove(&id);
            }
            None => {}
        }
        let node = state
            .nodes
            .get_mut(&file.id)
            .ok_or_else(|| SvError::NotFound(file.id.clone()))?;
        node.name = new_name.to_string();
        Ok(node.to_file())
    }

    async fn rename_folder(&self, folder: &RemoteFolder, new_name: &str) -> SvResult<RemoteFolder> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        let parent = state
            .get_folder(&self.email, &folder.id)?
            .parent
            .clone()
            .ok_or_else(|| SvError::fatal(&self.tag, "cannot rename the account root"))?;
        if state
            .child_named(&parent, new_name)
            .is_some_and(|n| n.id != folder.id)
        {
            return Err(SvError::AlreadyExists(new_name.to_string()));
        }
        let node = state
            .nodes
            .get_mut(&folder.id)
            .ok_or_else(|| SvError::NotFound(folder.id.clone()))?;
        node.name = new_name.to_string();
        Ok(node.to_folder())
    }

    async fn create_folder(&self, name: &str, parent: &RemoteFolder) -> SvResult<RemoteFolder> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        state.get_folder(&self.email, &parent.id)?;
        if let Some(existing) = state.child_named(&parent.id, name) {
            if existing.is_folder() {
                return Ok(existing.to_folder());
            }
            return Err(SvError::AlreadyExists(name.to_string()));
        }
        let id = state.alloc_id(&self.cloud.label);
        let node = Node {
            id: id.clone(),
            name: name.to_string(),
            parent: Some(parent.id.clone()),
            owner: self.email.clone(),
            body: Body::Folder { members: None },
        };
        let created = node.to_folder();
        state.nodes.insert(id, node);
        Ok(created)
    }

    async fn share_folder(&self, folder: &RemoteFolder, emails: &[String]) -> SvResult<RemoteFolder> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        let node = state.get_folder(&self.email, &folder.id)?;
        self.require_owner(node, "share")?;
        let node = state
            .nodes
            .get_mut(&folder.id)
            .ok_or_else(|| SvError::NotFound(folder.id.clone()))?;
        if let Body::Folder { members } = &mut node.body {
            let set = members.get_or_insert_with(BTreeSet::new);
            set.extend(emails.iter().filter(|e| **e != self.email).cloned());
        }
        tracing::debug!(backend = %self.tag, folder = %node.name, "folder shared");
        Ok(node.to_folder())
    }

    async fn unshare_folder(&self, folder: &RemoteFolder) -> SvResult<()> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        let node = state.get_folder(&self.email, &folder.id)?;
        self.require_owner(node, "unshare")?;
        if let Some(node) = state.nodes.get_mut(&folder.id) {
            node.body = Body::Folder { members: None };
        }
        Ok(())
    }

    async fn unshare_by_email(&self, folder: &RemoteFolder, email: &str) -> SvResult<()> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        let node = state.get_folder(&self.email, &folder.id)?;
        self.require_owner(node, "unshare")?;
        if let Some(Body::Folder {
            members: Some(members),
        }) = state.nodes.get_mut(&folder.id).map(|n| &mut n.body)
        {
            members.remove(email);
        }
        Ok(())
    }

    async fn leave_shared_folder(&self, folder: &RemoteFolder) -> SvResult<()> {
        self.ready()?;
        let mut state = self.cloud.state.write();
        let node = state.get_folder(&self.email, &folder.id)?;
        if node.owner == self.email {
            return Err(SvError::fatal(&self.tag, "the owner cannot leave a shared folder"));
        }
        let left = match state.nodes.get_mut(&folder.id).map(|n| &mut n.body) {
            Some(Body::Folder {
                members: Some(members),
            }) => members.remove(&self.email),
            _ => false,
        };
        if !left {
            return Err(SvError::NotFound(format!(
                "{} is not shared with {}",
                folder.name, self.email
            )));
        }
        Ok(())
    }

    async fn get_members_shared(&self, folder: &RemoteFolder) -> SvResult<Option<Vec<String>>> {
        self.ready()?;
        let state = self.cloud.state.read();
        let node = state.get_folder(&self.email, &folder.id)?;
        Ok(match &node.body {
            Body::Folder {
                members: Some(members),
            } => {
                let mut all: Vec<String> = std::iter::once(node.owner.clone())
                    .chain(members.iter().cloned())
                    .collect();
                all.sort();
                Some(all)
            }
            _ => None,
        })
    }

    async fn get_owner(&self, folder: &RemoteFolder) -> SvResult<String> {
        self.ready()?;
        let state = self.cloud.state.read();
        Ok(state.get_folder(&self.email, &folder.id)?.owner.clone())
    }

    async fn list_shared_folders(&self) -> SvResult<Vec<RemoteFolder>> {
        self.ready()?;
        let state = self.cloud.state.read();
        let mut folders: Vec<RemoteFolder> = state
            .nodes
            .values()
            .filter(|n| match &n.body {
                Body::Folder {
                    members: Some(members),
                } => n.owner == self.email || members.contains(&self.email),
                _ => false,
            })
            .map(Node::to_folder)
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend(cloud: &Arc<MemoryCloud>, email: &str) -> MemoryBackend {
        let b = MemoryBackend::new("G", email, cloud.clone());
        b.authenticate_cloud().await.unwrap();
        b
    }

    #[tokio::test]
    async fn requires_authentication() {
        let cloud = MemoryCloud::new("g");
        let b = MemoryBackend::new("G", "a@x", cloud);
        assert!(matches!(
            b.get_session_folder("s").await,
            Err(SvError::NotAuthenticated(_))
        ));
    }

    #[tokio::test]
    async fn session_folder_and_create_folder_are_idempotent() {
        let cloud = MemoryCloud::new("g");
        let b = backend(&cloud, "a@x").await;
        let s1 = b.get_session_folder("vault").await.unwrap();
        let s2 = b.get_session_folder("vault").await.unwrap();
        assert_eq!(s1, s2);

        let d1 = b.create_folder("docs", &s1).await.unwrap();
        let d2 = b.create_folder("docs", &s1).await.unwrap();
        assert_eq!(d1.id, d2.id);
    }

    #[tokio::test]
    async fn upload_overwrites_same_name() {
        let cloud = MemoryCloud::new("g");
        let b = backend(&cloud, "a@x").await;
        let root = b.get_session_folder("vault").await.unwrap();

        let f1 = b.upload_file(Bytes::from_static(b"one"), "1#a", &root).await.unwrap();
        let f2 = b.upload_file(Bytes::from_static(b"two"), "1#a", &root).await.unwrap();
        assert_eq!(f1.id, f2.id);
        assert_eq!(b.download_file(&f1).await.unwrap().as_ref(), b"two");
        assert_eq!(b.list_files(&root, "").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn children_filter_reserved_names() {
        let cloud = MemoryCloud::new("g");
        let b = backend(&cloud, "a@x").await;
        let root = b.get_session_folder("vault").await.unwrap();
        b.upload_file(Bytes::from_static(b"{}"), "$META", &root).await.unwrap();
        b.upload_file(Bytes::from_static(b"x"), "1#foo", &root).await.unwrap();
        b.create_folder("sub", &root).await.unwrap();

        let mut names: Vec<String> = b
            .get_children(&root, true)
            .await
            .unwrap()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["1#foo", "sub"]);
        assert_eq!(b.get_children(&root, false).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn soft_delete_moves_into_recycle_bin() {
        let cloud = MemoryCloud::new("g");
        let b = MemoryBackend::new("G", "a@x", cloud).with_hard_delete(false);
        b.authenticate_cloud().await.unwrap();
        let root = b.get_session_folder("vault").await.unwrap();
        let dir = b.create_folder("d", &root).await.unwrap();
        let f = b.upload_file(Bytes::from_static(b"x"), "1#f", &dir).await.unwrap();

        b.delete_file(&f).await.unwrap();
        assert!(b.list_files(&dir, "").await.unwrap().is_empty());

        let all = b.get_children(&root, false).await.unwrap();
        let bin = all
            .iter()
            .find_map(|i| match i {
                RemoteItem::Folder(f) if f.name == DELETED => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(b.list_files(&bin, "").await.unwrap()[0].name, "1#f");
    }

    #[tokio::test]
    async fn hard_delete_folder_drops_subtree() {
        let cloud = MemoryCloud::new("g");
        let b = backend(&cloud, "a@x").await;
        let root = b.get_session_folder("vault").await.unwrap();
        let before = cloud.node_count();
        let dir = b.create_folder("d", &root).await.unwrap();
        b.upload_file(Bytes::from_static(b"x"), "1#f", &dir).await.unwrap();
        b.delete_folder(&dir).await.unwrap();
        assert_eq!(cloud.node_count(), before);
    }

    #[tokio::test]
    async fn sharing_grants_and_leaving_revokes_access() {
        let cloud = MemoryCloud::new("g");
        let owner = backend(&cloud, "o@x").await;
        let member = backend(&cloud, "u@x").await;

        let team = owner.get_session_folder("team").await.unwrap();
        assert_eq!(owner.get_members_shared(&team).await.unwrap(), None);
        assert!(matches!(member.list_files(&team, "").await, Err(SvError::NotFound(_))));

        owner.share_folder(&team, &["u@x".to_string()]).await.unwrap();
        let visible = member.list_shared_folders().await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "team");
        assert_eq!(member.get_owner(&team).await.unwrap(), "o@x");
        assert_eq!(
            member.get_members_shared(&team).await.unwrap(),
            Some(vec!["o@x".to_string(), "u@x".to_string()])
        );

        member.upload_file(Bytes::from_static(b"pk"), "$PUBLIC_u@x", &team).await.unwrap();
        assert!(owner.get_file(&team, "$PUBLIC_u@x").await.unwrap().is_some());

        member.leave_shared_folder(&team).await.unwrap();
        assert!(member.list_shared_folders().await.unwrap().is_empty());
        assert!(matches!(member.list_files(&team, "").await, Err(SvError::NotFound(_))));
    }

    #[tokio::test]
    async fn only_owner_can_share() {
        let cloud = MemoryCloud::new("g");
        let owner = backend(&cloud, "o@x").await;
        let member = backend(&cloud, "u@x").await;
        let team = owner.get_session_folder("team").await.unwrap();
        owner.share_folder(&team, &["u@x".to_string()]).await.unwrap();

        let err = member.share_folder(&team, &["z@x".to_string()]).await.unwrap_err();
        assert!(matches!(err, SvError::BackendFatal { .. }));
        assert!(owner.leave_shared_folder(&team).await.is_err());
    }

    #[tokio::test]
    async fn offline_backend_is_transient() {
        let cloud = MemoryCloud::new("g");
        let b = backend(&cloud, "a@x").await;
        b.set_offline(true);
        let err = b.get_session_folder("vault").await.unwrap_err();
        assert!(err.is_retryable());
        b.set_offline(false);
        assert!(b.get_session_folder("vault").await.is_ok());
    }

    #[tokio::test]
    async fn search_reports_relative_dirs() {
        let cloud = MemoryCloud::new("g");
        let b = backend(&cloud, "a@x").await;
        let root = b.get_session_folder("vault").await.unwrap();
        let a = b.create_folder("a", &root).await.unwrap();
        let ab = b.create_folder("b", &a).await.unwrap();
        b.upload_file(Bytes::from_static(b"x"), "1#report.txt", &ab).await.unwrap();

        let hits = b.get_items_by_name("report", &[root]).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].dirs, vec!["a", "b"]);
        assert_eq!(hits[0].item.name(), "1#report.txt");
    }

    #[tokio::test]
    async fn rename_file_replaces_existing_target() {
        let cloud = MemoryCloud::new("g");
        let b = backend(&cloud, "a@x").await;
        let root = b.get_session_folder("vault").await.unwrap();
        let a = b.upload_file(Bytes::from_static(b"a"), "1#a", &root).await.unwrap();
        b.upload_file(Bytes::from_static(b"b"), "1#b", &root).await.unwrap();

        let renamed = b.rename_file(&a, "1#b").await.unwrap();
        assert_eq!(renamed.name, "1#b");
        let files = b.list_files(&root, "").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(b.download_file(&files[0]).await.unwrap().as_ref(), b"a");
    }
}
