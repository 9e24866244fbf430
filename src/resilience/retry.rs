//! Single-shot reconnect retry for persistence calls
//!
//! Connection-class failures (credential rotation, proxy failover, pool
//! exhaustion) get exactly one retry against a fresh connection; anything
//! else surfaces immediately. Deliberately no retry around the confirms
//! call - the breaker owns that dependency's failure handling.

use crate::error::{Result, TradeGuardError};
use std::future::Future;
use tracing::warn;

/// Whether a persistence error is worth one reconnect-and-retry
pub(crate) fn is_transient(err: &TradeGuardError) -> bool {
    match err {
        TradeGuardError::Database(db) => matches!(
            db,
            sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
        ),
        _ => false,
    }
}

/// Run `op`, retrying once if it fails with a transient connection error.
///
/// The pool re-establishes connections lazily, so the second attempt runs
/// against refreshed credentials/connections.
pub async fn with_reconnect<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Err(e) if is_transient(&e) => {
            warn!("{} hit transient connection error, retrying once: {}", op_name, e);
            op().await
        }
        other => other,
    }
}
