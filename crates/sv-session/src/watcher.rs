//! Background discovery of newly shared folders.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use sv_core::SvResult;
use sv_storage::BackendRef;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Called with the names of shared folders seen for the first time.
pub type DiscoveryFn = Arc<dyn Fn(Vec<String>) + Send + Sync>;

/// Union of shared folder names visible on `backends`. Backends that fail
/// are skipped unless all of them do.
pub async fn poll_shared_folders(backends: &[BackendRef]) -> SvResult<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let mut first_error = None;
    let mut any_ok = false;
    for b in backends {
        match b.list_shared_folders().await {
            Ok(folders) => {
                any_ok = true;
                names.extend(folders.into_iter().map(|f| f.name));
            }
            Err(e) if e.is_retryable() || matches!(e, sv_core::SvError::Unsupported { .. }) => {
                debug!(backend = %b.name(), error = %e, "shared folder poll skipped");
            }
            Err(e) => {
                warn!(backend = %b.name(), error = %e, "shared folder poll failed");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) if !any_ok => Err(e),
        _ => Ok(names),
    }
}

pub struct SharedFolderWatcher {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SharedFolderWatcher {
    /// Poll every `interval`, starting with names already in `known`.
    pub fn spawn(
        backends: Vec<BackendRef>,
        interval: Duration,
        known: BTreeSet<String>,
        on_new: DiscoveryFn,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut seen = known;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("shared folder watcher stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let current = match poll_shared_folders(&backends).await {
                            Ok(current) => current,
                            Err(e) => {
                                warn!(error = %e, "shared folder poll failed");
                                continue;
                            }
                        };
                        let fresh: Vec<String> = current.difference(&seen).cloned().collect();
                        if !fresh.is_empty() {
                            info!(folders = ?fresh, "new shared folders");
                            on_new(fresh);
                        }
                        seen = current;
                    }
                }
            }
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop polling and wait for the task to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "shared folder watcher panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl std::fmt::Debug for SharedFolderWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFolderWatcher")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Drop for SharedFolderWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
