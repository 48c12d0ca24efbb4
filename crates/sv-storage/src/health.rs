//! Storage health check

use opendal::Operator;
use sv_core::{SvError, SvResult};

/// Verify an object store is reachable by listing its root
pub async fn check_health(tag: &str, op: &Operator) -> SvResult<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| SvError::transient(tag, format!("storage health check failed: {e}")))
}

/// Returns true if storage is reachable, false otherwise (non-panicking)
pub async fn is_healthy(tag: &str, op: &Operator) -> bool {
    check_health(tag, op).await.is_ok()
}
