//! Trade confirmation dependency
//!
//! The confirms service is the volatile third-party exchange leg. Outbound
//! calls carry a short timeout and map HTTP statuses onto the closed
//! `ConfirmsError` taxonomy the circuit breaker keys off.

pub mod simulator;

use crate::domain::Activity;
use crate::error::{ConfirmsError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use simulator::{ExchangeSimulator, ParameterSource, SimulatedFault, StaticParameters};

/// Deep health report from the dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeHealth {
    pub available: bool,
    pub message: String,
}

/// Contract the order engine needs from the confirmation dependency
#[async_trait]
pub trait ConfirmsClient: Send + Sync {
    async fn confirm_trade(&self, activity: &Activity) -> std::result::Result<(), ConfirmsError>;

    async fn exchange_health(&self) -> Result<ExchangeHealth>;
}

/// HTTP client for the confirms service
pub struct HttpConfirmsClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpConfirmsClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ConfirmsClient for HttpConfirmsClient {
    async fn confirm_trade(&self, activity: &Activity) -> std::result::Result<(), ConfirmsError> {
        let response = self
            .client
            .post(self.url("confirm-trade/"))
            .json(activity)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ConfirmsError::Timeout {
                        elapsed_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    ConfirmsError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            503 => Err(ConfirmsError::Maintenance(body)),
            500 => Err(ConfirmsError::Glitch(body)),
            s => Err(ConfirmsError::Rejected { status: s }),
        }
    }

    async fn exchange_health(&self) -> Result<ExchangeHealth> {
        let response = self.client.get(self.url("exchange-health/")).send().await?;
        let available = response.status().is_success();
        let message = response.text().await.unwrap_or_default();
        Ok(ExchangeHealth { available, message })
    }
}

/// In-process client over the exchange simulator, used by tests and local
/// single-binary runs.
pub struct SimulatorConfirmsClient {
    simulator: std::sync::Arc<ExchangeSimulator>,
}

impl SimulatorConfirmsClient {
    pub fn new(simulator: std::sync::Arc<ExchangeSimulator>) -> Self {
        Self { simulator }
    }
}

#[async_trait]
impl ConfirmsClient for SimulatorConfirmsClient {
    async fn confirm_trade(&self, _activity: &Activity) -> std::result::Result<(), ConfirmsError> {
        self.simulator.confirm().await.map_err(|fault| match fault {
            SimulatedFault::Maintenance(msg) => ConfirmsError::Maintenance(msg),
            SimulatedFault::Glitch(msg) => ConfirmsError::Glitch(msg),
        })
    }

    async fn exchange_health(&self) -> Result<ExchangeHealth> {
        let (available, message) = self.simulator.health().await;
        Ok(ExchangeHealth { available, message })
    }
}
