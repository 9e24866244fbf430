//! Simulated off-platform exchange for chaos testing
//!
//! Two externally toggled parameters drive the fault behavior: the exchange
//! status (anything but AVAILABLE hard-fails every confirm) and the glitch
//! factor (ON makes every third confirm fail intermittently). Parameters
//! are re-read every Nth call rather than per call to bound lookup cost.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Exchange status value meaning "open for trading"
pub const STATUS_AVAILABLE: &str = "AVAILABLE";
/// Glitch factor value enabling intermittent failures
pub const GLITCH_ON: &str = "ON";
/// Glitch factor value disabling intermittent failures
pub const GLITCH_OFF: &str = "OFF";

/// Simulated fault surfaced by a confirm call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedFault {
    /// Exchange is not available; maps to HTTP 503
    Maintenance(String),
    /// Intermittent processing error; maps to HTTP 500
    Glitch(String),
}

/// Source of the two chaos parameters
#[async_trait]
pub trait ParameterSource: Send + Sync {
    async fn exchange_status(&self) -> Result<String>;

    async fn glitch_factor(&self) -> Result<String>;
}

/// In-memory parameter source with operational toggles
pub struct StaticParameters {
    exchange_status: RwLock<String>,
    glitch_factor: RwLock<String>,
}

impl StaticParameters {
    pub fn new(exchange_status: &str, glitch_factor: &str) -> Self {
        Self {
            exchange_status: RwLock::new(exchange_status.to_string()),
            glitch_factor: RwLock::new(glitch_factor.to_string()),
        }
    }

    /// Open exchange, no glitches
    pub fn healthy() -> Self {
        Self::new(STATUS_AVAILABLE, GLITCH_OFF)
    }

    pub async fn set_exchange_status(&self, status: &str) {
        *self.exchange_status.write().await = status.to_string();
    }

    pub async fn set_glitch_factor(&self, factor: &str) {
        *self.glitch_factor.write().await = factor.to_string();
    }
}

#[async_trait]
impl ParameterSource for StaticParameters {
    async fn exchange_status(&self) -> Result<String> {
        Ok(self.exchange_status.read().await.clone())
    }

    async fn glitch_factor(&self) -> Result<String> {
        Ok(self.glitch_factor.read().await.clone())
    }
}

/// The simulated exchange itself
pub struct ExchangeSimulator {
    params: Arc<dyn ParameterSource>,
    refresh_every: u64,
    call_count: AtomicU64,
    exchange_status: RwLock<String>,
    glitch_factor: RwLock<String>,
}

impl ExchangeSimulator {
    /// Build the simulator, force-reading both parameters once at startup
    pub async fn new(params: Arc<dyn ParameterSource>, refresh_every: u64) -> Result<Self> {
        let exchange_status = params.exchange_status().await?;
        let glitch_factor = params.glitch_factor().await?;
        info!(
            "Exchange simulator starting: status={}, glitch={}",
            exchange_status, glitch_factor
        );
        Ok(Self {
            params,
            refresh_every: refresh_every.max(1),
            call_count: AtomicU64::new(0),
            exchange_status: RwLock::new(exchange_status),
            glitch_factor: RwLock::new(glitch_factor),
        })
    }

    /// Refresh cached parameters; on lookup failure keep serving the cached
    /// values rather than taking the simulator down.
    async fn refresh(&self) {
        match self.params.exchange_status().await {
            Ok(status) => *self.exchange_status.write().await = status,
            Err(e) => warn!("Exchange status refresh failed, keeping cached value: {}", e),
        }
        match self.params.glitch_factor().await {
            Ok(factor) => *self.glitch_factor.write().await = factor,
            Err(e) => warn!("Glitch factor refresh failed, keeping cached value: {}", e),
        }
    }

    /// Simulate placing a trade with the off-platform exchange
    pub async fn confirm(&self) -> std::result::Result<(), SimulatedFault> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count % self.refresh_every == 0 {
            self.refresh().await;
        }

        let status = self.exchange_status.read().await.clone();
        if status != STATUS_AVAILABLE {
            error!("Exchange status is {}, rejecting confirm", status);
            return Err(SimulatedFault::Maintenance(format!(
                "Exchange is not available, come back later! (status: {})",
                status
            )));
        }

        let glitch = self.glitch_factor.read().await.clone();
        if glitch == GLITCH_ON && count % 3 == 0 {
            error!("Glitch factor is {}, injecting processing error", glitch);
            return Err(SimulatedFault::Glitch(
                "Processing error, please try again...".to_string(),
            ));
        }

        // Delay to simulate doing some work
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        Ok(())
    }

    /// Deep health: open and not glitching
    pub async fn health(&self) -> (bool, String) {
        let status = self.exchange_status.read().await.clone();
        let glitch = self.glitch_factor.read().await.clone();
        let available = status == STATUS_AVAILABLE || glitch == GLITCH_OFF;
        let message = format!("Exchange is {} and glitch factor is {}.", status, glitch);
        (available, message)
    }

    pub fn calls_seen(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }
}
