//! Scratch space and name reservations.
//!
//! Open and copy stage plaintext in a per-process temporary directory that
//! is removed when the last handle drops. Picking a fresh `" (n)"` name is a
//! check-then-act race between concurrent copies, so chosen names stay
//! reserved until the returned [`Reservation`] is dropped.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use sv_core::SvResult;
use tempfile::TempDir;

#[derive(Debug, Default)]
struct Reserved {
    keys: ReentrantMutex<RefCell<HashSet<String>>>,
}

/// A name held until drop.
#[derive(Debug)]
pub struct Reservation {
    key: String,
    name: String,
    owner: Arc<Reserved>,
}

impl Reservation {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let guard = self.owner.keys.lock();
        guard.borrow_mut().remove(&self.key);
    }
}

#[derive(Debug)]
pub struct ScratchSpace {
    root: PathBuf,
    _tmp: Option<TempDir>,
    reserved: Arc<Reserved>,
}

/// `"report.txt"`, 2 -> `"report (2).txt"`. Dotfiles keep their leading dot.
pub fn numbered_name(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({n}){}", &name[..dot], &name[dot..]),
        _ => format!("{name} ({n})"),
    }
}

impl ScratchSpace {
    /// A fresh temporary directory, removed on drop.
    pub fn temporary() -> SvResult<Self> {
        let tmp = tempfile::Builder::new().prefix("splitvault-").tempdir()?;
        Ok(Self {
            root: tmp.path().to_path_buf(),
            _tmp: Some(tmp),
            reserved: Arc::default(),
        })
    }

    /// Use a configured directory; it is created but never removed.
    pub fn at(root: impl Into<PathBuf>) -> SvResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            _tmp: None,
            reserved: Arc::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve the first of `name`, `name (1)`, `name (2)`, ... in `scope`
    /// that `taken` does not report and nobody else holds.
    pub fn reserve(&self, scope: &str, name: &str, taken: impl Fn(&str) -> bool) -> Reservation {
        let guard = self.reserved.keys.lock();
        let mut n = 0;
        loop {
            let candidate = numbered_name(name, n);
            let key = format!("{scope}\u{0}{candidate}");
            let free = !guard.borrow().contains(&key) && !taken(&candidate);
            if free {
                guard.borrow_mut().insert(key.clone());
                return Reservation {
                    key,
                    name: candidate,
                    owner: self.reserved.clone(),
                };
            }
            n += 1;
        }
    }

    /// Reserve a path in local directory `dir` that does not exist yet.
    pub fn reserve_local(&self, dir: &Path, name: &str) -> (PathBuf, Reservation) {
        let reservation = self.reserve(&dir.to_string_lossy(), name, |candidate| {
            dir.join(candidate).exists()
        });
        (dir.join(reservation.name()), reservation)
    }

    /// Reserve a fresh path inside the scratch directory.
    pub fn reserve_scratch(&self, name: &str) -> (PathBuf, Reservation) {
        let root = self.root.clone();
        self.reserve_local(&root, name)
    }
}
