//! Whole-object copies at the session root.
//!
//! `$META`, `$LOGIN_META` and the key-exchange objects are not split: every
//! backend holds a full copy. Reads take the first copy found in backend
//! order; writes go everywhere and report per-backend outcomes.

use std::collections::HashMap;

use bytes::Bytes;
use serde::Serialize;
use sv_core::{SvError, SvResult};
use sv_split::{hash_bytes, hash_to_hex};
use sv_storage::{CloudBackend, RemoteFile};
use tracing::{debug, warn};

use crate::pool::Gathered;
use crate::session::Session;

/// Name of a root-level replicated object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaName {
    /// Same name on every backend
    Fixed(String),
    /// `prefix` followed by the account email of each backend
    PerAccount(&'static str),
}

impl ReplicaName {
    pub fn for_backend(&self, backend: &dyn CloudBackend) -> String {
        match self {
            ReplicaName::Fixed(name) => name.clone(),
            ReplicaName::PerAccount(prefix) => format!("{prefix}{}", backend.email()),
        }
    }
}

impl From<&str> for ReplicaName {
    fn from(name: &str) -> Self {
        ReplicaName::Fixed(name.to_string())
    }
}

impl From<String> for ReplicaName {
    fn from(name: String) -> Self {
        ReplicaName::Fixed(name)
    }
}

/// Outcome of comparing the copies of one replicated object.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub name: String,
    /// `(backend, BLAKE3 hex)` for every copy that could be read
    pub copies: Vec<(String, String)>,
    /// Digest held by a strict plurality of copies
    pub majority: Option<String>,
    /// Backends whose copy differs from the majority
    pub dissenting: Vec<String>,
    /// Backends without a copy
    pub missing: Vec<String>,
    pub unreachable: Vec<String>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.majority.is_some()
            && self.dissenting.is_empty()
            && self.missing.is_empty()
            && self.unreachable.is_empty()
    }
}

impl Session {
    /// Write `data` as a full copy on every active backend, overwriting any
    /// existing copy.
    pub async fn upload_replicated(
        &self,
        name: impl Into<ReplicaName>,
        data: Bytes,
    ) -> SvResult<Gathered<String, RemoteFile>> {
        let name = name.into();
        let root = self.root()?;
        let gathered = self
            .on_each_dir(&root, |b, h| {
                let object = name.for_backend(b.as_ref());
                let data = data.clone();
                // upload_file overwrites in place; the old copy survives a failed write
                async move { b.upload_file(data, &object, &h).await }
            })
            .await;
        for (tag, e) in gathered.failures() {
            warn!(session = %self.name(), backend = %tag, object = ?name, error = %e, "replicated write failed");
        }
        Ok(gathered)
    }

    /// The first copy found in backend order.
    ///
    /// `None` if no backend has one. An error only if no copy was found and
    /// some backend failed for a reason other than absence.
    pub async fn download_replicated(&self, name: impl Into<ReplicaName>) -> SvResult<Option<Bytes>> {
        let name = name.into();
        let root = self.root()?;
        let gathered = self
            .on_each_dir(&root, |b, h| {
                let object = name.for_backend(b.as_ref());
                async move {
                    match b.get_file(&h, &object).await? {
                        Some(f) => Ok(Some(b.download_file(&f).await?)),
                        None => Ok(None),
                    }
                }
            })
            .await;

        let mut failure = None;
        for (tag, result) in gathered.results {
            match result {
                Ok(Some(bytes)) => return Ok(Some(bytes)),
                Ok(None) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    debug!(backend = %tag, object = ?name, error = %e, "replicated read failed");
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// The copy held by one backend.
    pub async fn download_from(&self, tag: &str, name: &str) -> SvResult<Option<Bytes>> {
        let root = self.root()?;
        let backend = self
            .backend(tag)
            .ok_or_else(|| SvError::NotAuthenticated(format!("backend {tag} is not configured")))?;
        let handle = root
            .handle(tag)
            .ok_or_else(|| SvError::NotFound(format!("session root on {tag}")))?;
        match backend.get_file(handle, name).await? {
            Some(f) => Ok(Some(backend.download_file(&f).await?)),
            None => Ok(None),
        }
    }

    /// Delete every copy. The value is whether a copy existed.
    pub async fn delete_replicated(&self, name: impl Into<ReplicaName>) -> SvResult<Gathered<String, bool>> {
        let name = name.into();
        let root = self.root()?;
        Ok(self
            .on_each_dir(&root, |b, h| {
                let object = name.for_backend(b.as_ref());
                async move {
                    match b.get_file(&h, &object).await? {
                        Some(f) => b.delete_file(&f).await.map(|_| true),
                        None => Ok(false),
                    }
                }
            })
            .await)
    }

    /// Root objects whose name starts with `prefix`, per backend.
    pub async fn list_replicated(&self, prefix: &str) -> SvResult<Vec<(String, RemoteFile)>> {
        let root = self.root()?;
        let prefix_owned = prefix.to_string();
        let gathered = self
            .on_each_dir(&root, |b, h| {
                let prefix = prefix_owned.clone();
                async move { b.list_files(&h, &prefix).await }
            })
            .await;
        if gathered.ok_count() == 0 {
            return Err(gathered
                .into_all()
                .err()
                .unwrap_or_else(|| SvError::NotFound(prefix.to_string())));
        }

        let mut found = Vec::new();
        for (tag, result) in gathered.results {
            match result {
                Ok(files) => found.extend(
                    files
                        .into_iter()
                        .filter(|f| f.name.starts_with(prefix))
                        .map(|f| (tag.clone(), f)),
                ),
                Err(e) => warn!(backend = %tag, error = %e, "listing root failed"),
            }
        }
        Ok(found)
    }

    /// Hash every copy of `name` and compare them by majority vote.
    pub async fn check_replicated_integrity(&self, name: &str) -> SvResult<IntegrityReport> {
        let root = self.root()?;
        let object = name.to_string();
        let gathered = self
            .on_each_dir(&root, |b, h| {
                let object = object.clone();
                async move {
                    match b.get_file(&h, &object).await? {
                        Some(f) => Ok(Some(hash_to_hex(&hash_bytes(&b.download_file(&f).await?)))),
                        None => Ok(None),
                    }
                }
            })
            .await;

        let mut report = IntegrityReport {
            name: name.to_string(),
            copies: Vec::new(),
            majority: None,
            dissenting: Vec::new(),
            missing: Vec::new(),
            unreachable: Vec::new(),
        };
        for (tag, result) in gathered.results {
            match result {
                Ok(Some(digest)) => report.copies.push((tag, digest)),
                Ok(None) => report.missing.push(tag),
                Err(e) if e.is_not_found() => report.missing.push(tag),
                Err(e) => {
                    warn!(backend = %tag, object = %name, error = %e, "integrity read failed");
                    report.unreachable.push(tag);
                }
            }
        }

        let mut votes: HashMap<&str, usize> = HashMap::new();
        for (_, digest) in &report.copies {
            *votes.entry(digest.as_str()).or_default() += 1;
        }
        let top = votes.values().copied().max().unwrap_or(0);
        let leaders: Vec<&str> = votes
            .iter()
            .filter(|(_, n)| **n == top)
            .map(|(d, _)| *d)
            .collect();
        if let [winner] = leaders.as_slice() {
            let winner = winner.to_string();
            report.dissenting = report
                .copies
                .iter()
                .filter(|(_, d)| *d != winner)
                .map(|(t, _)| t.clone())
                .collect();
            report.majority = Some(winner);
        }

        if !report.is_consistent() {
            warn!(
                object = %name,
                dissenting = ?report.dissenting,
                missing = ?report.missing,
                "replicated object is inconsistent"
            );
        }
        Ok(report)
    }
}
