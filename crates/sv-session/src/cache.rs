//! In-memory map from logical path to what each backend holds for it.

use std::collections::HashMap;

use parking_lot::RwLock;
use sv_core::names::{self, ROOT};
use sv_core::{ItemKind, ListedItem};
use sv_storage::{RemoteFile, RemoteFolder};

/// A logical folder: one backend folder handle per backend tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Directory {
    pub path: String,
    pub handles: HashMap<String, RemoteFolder>,
}

impl Directory {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: names::normalize(&path.into()),
            handles: HashMap::new(),
        }
    }

    pub fn handle(&self, tag: &str) -> Option<&RemoteFolder> {
        self.handles.get(tag)
    }
}

/// A logical file: per backend, its shares at `index - 1`.
///
/// Backends keep the order they were inserted in; that order defines the
/// global share index used when downloading.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudFile {
    pub path: String,
    pub shares: Vec<(String, Vec<Option<RemoteFile>>)>,
}

impl CloudFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: names::normalize(&path.into()),
            shares: Vec::new(),
        }
    }

    /// Slot list for `tag`, created with `copies` empty slots if missing.
    pub fn slots_mut(&mut self, tag: &str, copies: usize) -> &mut Vec<Option<RemoteFile>> {
        let pos = match self.shares.iter().position(|(t, _)| t == tag) {
            Some(pos) => pos,
            None => {
                self.shares.push((tag.to_string(), vec![None; copies]));
                self.shares.len() - 1
            }
        };
        &mut self.shares[pos].1
    }

    pub fn slots(&self, tag: &str) -> Option<&[Option<RemoteFile>]> {
        self.shares
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, slots)| slots.as_slice())
    }

    /// Every stored share as `(tag, slot, handle)` in global index order.
    pub fn present(&self) -> impl Iterator<Item = (&str, usize, &RemoteFile)> {
        self.shares.iter().flat_map(|(tag, slots)| {
            slots
                .iter()
                .enumerate()
                .filter_map(move |(j, s)| s.as_ref().map(|f| (tag.as_str(), j, f)))
        })
    }

    pub fn share_count(&self) -> usize {
        self.present().count()
    }

    pub fn size(&self) -> u64 {
        self.present().map(|(_, _, f)| f.size).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Directory(Directory),
    File(CloudFile),
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::Directory(d) => &d.path,
            Entry::File(f) => &f.path,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Entry::Directory(_) => ItemKind::Folder,
            Entry::File(_) => ItemKind::File,
        }
    }

    pub fn to_listed(&self) -> ListedItem {
        ListedItem {
            name: names::basename(self.path()),
            path: self.path().to_string(),
            kind: self.kind(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PathCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Entry> {
        self.entries.read().get(&names::normalize(path)).cloned()
    }

    pub fn get_dir(&self, path: &str) -> Option<Directory> {
        match self.get(path)? {
            Entry::Directory(d) => Some(d),
            Entry::File(_) => None,
        }
    }

    pub fn get_file(&self, path: &str) -> Option<CloudFile> {
        match self.get(path)? {
            Entry::File(f) => Some(f),
            Entry::Directory(_) => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(&names::normalize(path))
    }

    pub fn insert(&self, entry: Entry) {
        self.entries.write().insert(entry.path().to_string(), entry);
    }

    pub fn insert_dir(&self, dir: Directory) {
        self.insert(Entry::Directory(dir));
    }

    pub fn insert_file(&self, file: CloudFile) {
        self.insert(Entry::File(file));
    }

    pub fn remove(&self, path: &str) -> Option<Entry> {
        self.entries.write().remove(&names::normalize(path))
    }

    /// Remove `path` and every entry below it.
    pub fn remove_prefix(&self, path: &str) -> usize {
        let path = names::normalize(path);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|p, _| !names::is_within(p, &path) || (path == ROOT && p == ROOT));
        before - entries.len()
    }

    /// Cached entries whose parent is `path`.
    pub fn children(&self, path: &str) -> Vec<Entry> {
        let path = names::normalize(path);
        self.entries
            .read()
            .values()
            .filter(|e| e.path() != ROOT && names::parent(e.path()) == path)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
