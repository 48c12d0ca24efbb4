//! Bounded fan-out/gather over tokio tasks.
//!
//! Every multi-backend operation submits one task per (backend, share) and
//! waits for all of them. The pool caps how many run at once across the
//! whole process; by default that is five per backend.

use std::future::Future;
use std::sync::Arc;

use sv_core::{SvError, SvResult};
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

/// Outcome of one fan-out: every task's result keyed by what it was
/// submitted for, in submission order.
#[derive(Debug)]
pub struct Gathered<K, T> {
    pub results: Vec<(K, SvResult<T>)>,
    pub all_ok: bool,
}

impl<K, T> Gathered<K, T> {
    pub fn successes(&self) -> impl Iterator<Item = (&K, &T)> {
        self.results
            .iter()
            .filter_map(|(k, r)| r.as_ref().ok().map(|v| (k, v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&K, &SvError)> {
        self.results
            .iter()
            .filter_map(|(k, r)| r.as_ref().err().map(|e| (k, e)))
    }

    pub fn ok_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    /// Every value, or the first error if any task failed.
    pub fn into_all(self) -> SvResult<Vec<(K, T)>> {
        self.results
            .into_iter()
            .map(|(k, r)| r.map(|v| (k, v)))
            .collect()
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// `per_backend` workers for each of `backends`.
    pub fn for_backends(backends: usize, per_backend: usize) -> Self {
        Self::new(backends * per_backend)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Refuse new work. Tasks already holding a permit run to completion.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Run every task on the pool and wait for all of them.
    pub async fn gather<K, T, Fut>(&self, tasks: Vec<(K, Fut)>) -> Gathered<K, T>
    where
        T: Send + 'static,
        Fut: Future<Output = SvResult<T>> + Send + 'static,
    {
        let mut keys = Vec::with_capacity(tasks.len());
        let mut handles = Vec::with_capacity(tasks.len());
        for (key, task) in tasks {
            let semaphore = self.semaphore.clone();
            keys.push(key);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SvError::Other(anyhow::anyhow!("worker pool is shut down")))?;
                task.await
            }));
        }

        let joined = futures::future::join_all(handles).await;
        let mut all_ok = true;
        let results = keys
            .into_iter()
            .zip(joined)
            .map(|(key, joined)| {
                let result = joined.unwrap_or_else(|e| {
                    Err(SvError::Other(anyhow::anyhow!("worker task failed: {e}")))
                });
                all_ok &= result.is_ok();
                (key, result)
            })
            .collect();
        Gathered { results, all_ok }
    }
}
