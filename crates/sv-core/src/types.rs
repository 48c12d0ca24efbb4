use serde::{Deserialize, Serialize};

use crate::error::{SvError, SvResult};

/// Per-session descriptor stored replicated as `$META` in every session root.
///
/// `order` is authoritative: sessions reorder, add or drop backends to match
/// it when they load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Cipher name (`aes`, `xchacha20`, `null`)
    pub encrypt: String,
    /// Split codec name (`none`, `shamir`)
    pub split: String,
    /// Backend tags in share order
    pub order: Vec<String>,
}

impl SessionMeta {
    pub fn to_bytes(&self) -> SvResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> SvResult<Self> {
        let meta: SessionMeta = serde_json::from_slice(data)
            .map_err(|e| SvError::Corruption(format!("unreadable $META: {e}")))?;
        if meta.order.is_empty() {
            return Err(SvError::Corruption("$META lists no backends".into()));
        }
        Ok(meta)
    }
}

/// What a listing entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// A user-visible item returned by listings and searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedItem {
    pub name: String,
    pub path: String,
    pub kind: ItemKind,
}
