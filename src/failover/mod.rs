//! Region mode detection
//!
//! Failover between regions is signalled by the presence of a well-known
//! marker object in a region-scoped durable store. Presence means this
//! region is passive; absence (including an empty store) means active.
//! Toggling failover is therefore a single idempotent write or delete by
//! operational tooling, with no write access to application state stores.

use crate::error::{Result, TradeGuardError};
use async_trait::async_trait;
use dashmap::DashSet;
use tracing::debug;

pub use crate::config::RegionRole;

/// Well-known marker object key
pub const FAILOVER_MARKER_KEY: &str = "failover.txt";

/// Point lookup against the region-scoped durable object store
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Whether the object exists. Probe failures must surface as errors,
    /// never as "absent".
    async fn marker_present(&self, key: &str) -> Result<bool>;
}

/// Live region mode, derived per probe and never stored
#[async_trait]
pub trait ModeProvider: Send + Sync {
    /// True when the failover marker is present and this region must stand
    /// down from side-effecting processing.
    async fn is_passive(&self) -> Result<bool>;
}

/// Mode provider backed by a marker-object probe
pub struct MarkerModeProvider<S: ?Sized> {
    store: std::sync::Arc<S>,
    marker_key: String,
}

impl<S: MarkerStore + ?Sized> MarkerModeProvider<S> {
    pub fn new(store: std::sync::Arc<S>, marker_key: impl Into<String>) -> Self {
        Self {
            store,
            marker_key: marker_key.into(),
        }
    }
}

#[async_trait]
impl<S: MarkerStore + ?Sized> ModeProvider for MarkerModeProvider<S> {
    async fn is_passive(&self) -> Result<bool> {
        let present = self.store.marker_present(&self.marker_key).await?;
        debug!(marker = %self.marker_key, present, "failover marker probe");
        Ok(present)
    }
}

/// Marker store over HTTP: 200 means present, 404 means absent, anything
/// else is a probe failure.
pub struct HttpMarkerStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarkerStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MarkerStore for HttpMarkerStore {
    async fn marker_present(&self, key: &str) -> Result<bool> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), key);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| TradeGuardError::FailoverProbe(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::OK => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(TradeGuardError::FailoverProbe(format!(
                "unexpected status {} probing {}",
                status, url
            ))),
        }
    }
}

/// In-memory marker store for tests and local chaos runs
#[derive(Default)]
pub struct MemoryMarkerStore {
    markers: DashSet<String>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the operational failover toggle
    pub fn set_marker(&self, key: &str) {
        self.markers.insert(key.to_string());
    }

    pub fn clear_marker(&self, key: &str) {
        self.markers.remove(key);
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn marker_present(&self, key: &str) -> Result<bool> {
        Ok(self.markers.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FailingStore;

    #[async_trait]
    impl MarkerStore for FailingStore {
        async fn marker_present(&self, _key: &str) -> Result<bool> {
            Err(TradeGuardError::FailoverProbe("store unreachable".into()))
        }
    }

    #[tokio::test]
    async fn empty_store_means_active() {
        let store = Arc::new(MemoryMarkerStore::new());
        let provider = MarkerModeProvider::new(store, FAILOVER_MARKER_KEY);
        assert!(!provider.is_passive().await.unwrap());
    }

    #[tokio::test]
    async fn marker_presence_means_passive() {
        let store = Arc::new(MemoryMarkerStore::new());
        store.set_marker(FAILOVER_MARKER_KEY);
        let provider = MarkerModeProvider::new(Arc::clone(&store), FAILOVER_MARKER_KEY);
        assert!(provider.is_passive().await.unwrap());

        store.clear_marker(FAILOVER_MARKER_KEY);
        assert!(!provider.is_passive().await.unwrap());
    }

    #[tokio::test]
    async fn probe_failure_is_an_error_not_a_mode() {
        let provider = MarkerModeProvider::new(Arc::new(FailingStore), FAILOVER_MARKER_KEY);
        assert!(matches!(
            provider.is_passive().await,
            Err(TradeGuardError::FailoverProbe(_))
        ));
    }
}
