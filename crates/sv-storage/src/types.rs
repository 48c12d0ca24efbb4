//! Backend-side handles. Identity is only meaningful within one backend.

/// A stored object (one share or one reserved file).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFile {
    /// Backend-specific identity (node id or object key)
    pub id: String,
    pub name: String,
    /// Identity of the containing folder
    pub parent: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteItem {
    File(RemoteFile),
    Folder(RemoteFolder),
}

impl RemoteItem {
    pub fn name(&self) -> &str {
        match self {
            RemoteItem::File(f) => &f.name,
            RemoteItem::Folder(f) => &f.name,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RemoteItem::File(f) => &f.id,
            RemoteItem::Folder(f) => &f.id,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, RemoteItem::Folder(_))
    }
}

/// A hit from a recursive name search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedItem {
    /// Folder names from the searched folder down to the item's parent
    pub dirs: Vec<String>,
    pub item: RemoteItem,
}
