//! Idempotency guard for side-effecting operations
//!
//! Deduplicates by caller-supplied key against a shared durable store. The
//! conditional create of the in-progress record is the sole cross-instance
//! mutual-exclusion point; completed results are replayed verbatim until
//! they expire.

use crate::error::{Result, TradeGuardError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle of an idempotency record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotencyStatus {
    InProgress,
    Completed,
}

/// Durable record keyed by the request's idempotency key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub status: IdempotencyStatus,
    pub result: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of the conditional create
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    /// No live record existed; an in-progress record was created and this
    /// caller owns the execution
    Started,
    /// A completed, unexpired record exists; replay its result
    Completed(serde_json::Value),
    /// An in-progress record exists; a concurrent duplicate is mid-flight
    InFlight,
}

/// Storage contract for idempotency records.
///
/// `try_begin` must be an atomic conditional write: when two writers race
/// on the same key, exactly one observes `Started`. Expired records behave
/// as absent and are replaced in place.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn try_begin(&self, key: &str, expires_at: DateTime<Utc>) -> Result<BeginOutcome>;

    async fn complete(&self, key: &str, result: serde_json::Value) -> Result<()>;

    /// Drop the record so a redelivery can retry after a failed execution
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Executes an operation at most once per key
pub struct IdempotencyGuard<S: ?Sized> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: IdempotencyStore + ?Sized> IdempotencyGuard<S> {
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// TTL from whole seconds, as carried in configuration
    pub fn with_ttl_secs(store: Arc<S>, ttl_secs: u64) -> Self {
        Self::new(store, Duration::seconds(ttl_secs as i64))
    }

    /// Run `op` at most once for `key`.
    ///
    /// A missing or empty key is a fatal input error. A completed record
    /// replays the stored result without re-running `op`; an in-flight
    /// record surfaces `ConcurrentExecution` for upstream redelivery to
    /// resolve. If `op` fails, the in-progress record is removed so the
    /// retry starts clean.
    pub async fn execute<T, F, Fut>(&self, key: Option<&str>, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = match key {
            Some(k) if !k.is_empty() => k,
            _ => return Err(TradeGuardError::MissingIdempotencyKey),
        };

        let expires_at = Utc::now() + self.ttl;
        match self.store.try_begin(key, expires_at).await? {
            BeginOutcome::Completed(stored) => {
                debug!("Replaying stored result for idempotency key {}", key);
                Ok(serde_json::from_value(stored)?)
            }
            BeginOutcome::InFlight => Err(TradeGuardError::ConcurrentExecution {
                key: key.to_string(),
            }),
            BeginOutcome::Started => match op().await {
                Ok(value) => {
                    let stored = serde_json::to_value(&value)?;
                    self.store.complete(key, stored).await?;
                    Ok(value)
                }
                Err(e) => {
                    if let Err(cleanup) = self.store.remove(key).await {
                        warn!(
                            "Failed to remove in-progress record for {}: {}",
                            key, cleanup
                        );
                    }
                    Err(e)
                }
            },
        }
    }
}
