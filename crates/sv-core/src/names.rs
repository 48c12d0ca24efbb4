//! Reserved object names, the share-name grammar, and logical path helpers.
//!
//! Every object a session writes lives under the session root of each
//! backend. Bookkeeping objects start with `$` and are never shown to users.
//! User file shares are stored as `"{index}#{basename}"`.

use crate::error::{SvError, SvResult};

/// Prefix marking bookkeeping objects.
pub const RESERVED_PREFIX: char = '$';

/// Separator between share index and basename in a share object name.
pub const SHARE_SEPARATOR: char = '#';

pub const META: &str = "$META";
pub const LOGIN_META: &str = "$LOGIN_META";
pub const FEK: &str = "$FEK";
pub const DELETED: &str = "$DELETED";

pub const FEK_PREFIX: &str = "$FEK_";
pub const TFEK_PREFIX: &str = "$TFEK_";
pub const PUBLIC_PREFIX: &str = "$PUBLIC_";
pub const SHARED_PREFIX: &str = "$SHARED_";

pub const ROOT: &str = "/";

pub fn fek_name(email: &str) -> String {
    format!("{FEK_PREFIX}{email}")
}

pub fn tfek_name(email: &str) -> String {
    format!("{TFEK_PREFIX}{email}")
}

pub fn public_name(email: &str) -> String {
    format!("{PUBLIC_PREFIX}{email}")
}

pub fn shared_name(email: &str) -> String {
    format!("{SHARED_PREFIX}{email}")
}

pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Object name of share `index` (1-based) of `basename`.
pub fn share_name(index: usize, basename: &str) -> String {
    format!("{index}{SHARE_SEPARATOR}{basename}")
}

/// Parse `"{index}#{basename}"`. Returns `None` for anything that is not a
/// well-formed share name (such names are treated as folders by listings).
pub fn parse_share_name(name: &str) -> Option<(usize, &str)> {
    let (index, basename) = name.split_once(SHARE_SEPARATOR)?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if basename.is_empty() || basename.contains(SHARE_SEPARATOR) || basename.contains('/') {
        return None;
    }
    let index: usize = index.parse().ok()?;
    if index == 0 {
        return None;
    }
    Some((index, basename))
}

/// Validate a user-supplied file or folder name.
///
/// Rejects empty names, path separators, `..`, the share separator and the
/// reserved prefix.
pub fn validate_basename(name: &str) -> SvResult<()> {
    let bad = name.is_empty()
        || name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains(SHARE_SEPARATOR)
        || name.contains(RESERVED_PREFIX)
        || name.chars().any(char::is_control);
    if bad {
        return Err(SvError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Normalize a logical path: leading `/`, no trailing `/`, no empty segments.
pub fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    if segments.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

pub fn join(parent: &str, name: &str) -> String {
    let parent = normalize(parent);
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Parent of a logical path. The root is its own parent.
pub fn parent(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

pub fn basename(path: &str) -> String {
    let path = normalize(path);
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// Segments of a normalized path, root excluded.
pub fn segments(path: &str) -> Vec<String> {
    normalize(path)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// True if `path` equals `ancestor` or lies beneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    let path = normalize(path);
    let ancestor = normalize(ancestor);
    if ancestor == ROOT {
        return true;
    }
    path == ancestor || path.starts_with(&format!("{ancestor}/"))
}
