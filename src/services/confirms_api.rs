//! Simulated trade confirms service
//!
//! HTTP face of the exchange simulator. Operational parameter flips show up
//! here as 503s (maintenance) and intermittent 500s (glitch), which is what
//! the order API's circuit breaker is tuned against.

use crate::confirms::{ExchangeSimulator, SimulatedFault};
use crate::error::TradeGuardError;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

pub fn confirms_router(simulator: Arc<ExchangeSimulator>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/exchange-health/", get(exchange_health_handler))
        .route("/confirm-trade/", post(confirm_trade_handler))
        .layer(CorsLayer::permissive())
        .with_state(simulator)
}

/// Confirms API server
pub struct ConfirmsApiServer {
    simulator: Arc<ExchangeSimulator>,
    port: u16,
}

impl ConfirmsApiServer {
    pub fn new(simulator: Arc<ExchangeSimulator>, port: u16) -> Self {
        Self { simulator, port }
    }

    pub async fn run(&self) -> crate::error::Result<()> {
        let app = confirms_router(Arc::clone(&self.simulator));
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting confirms API on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| TradeGuardError::Internal(format!("Confirms API server error: {}", e)))?;
        Ok(())
    }
}

/// Shallow health for the load balancer
async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// Deep health: open for trading and running normally
async fn exchange_health_handler(
    State(simulator): State<Arc<ExchangeSimulator>>,
) -> impl IntoResponse {
    let (available, message) = simulator.health().await;
    info!("Call to /exchange-health/ response is {}", message);
    let status = if available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, message)
}

/// Simulated placing of a trade with the off-platform exchange
async fn confirm_trade_handler(
    State(simulator): State<Arc<ExchangeSimulator>>,
) -> impl IntoResponse {
    match simulator.confirm().await {
        Ok(()) => (StatusCode::OK, "Trade Confirmed".to_string()),
        Err(SimulatedFault::Maintenance(msg)) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        Err(SimulatedFault::Glitch(msg)) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirms::simulator::{StaticParameters, GLITCH_ON, STATUS_AVAILABLE};
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn simulator(status: &str, glitch: &str) -> Arc<ExchangeSimulator> {
        Arc::new(
            ExchangeSimulator::new(Arc::new(StaticParameters::new(status, glitch)), 10)
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn healthy_exchange_confirms_trades() {
        let app = confirms_router(simulator(STATUS_AVAILABLE, "OFF").await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/confirm-trade/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"Trade Confirmed");
    }

    #[tokio::test]
    async fn maintenance_returns_service_unavailable() {
        let app = confirms_router(simulator("MAINTENANCE", "OFF").await);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/confirm-trade/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn glitch_returns_internal_error_every_third_call() {
        let app = confirms_router(simulator(STATUS_AVAILABLE, GLITCH_ON).await);
        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/confirm-trade/")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            statuses.push(response.status());
        }
        assert_eq!(
            statuses,
            vec![
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::INTERNAL_SERVER_ERROR
            ]
        );
    }

    #[tokio::test]
    async fn shallow_health_always_ok() {
        let app = confirms_router(simulator("MAINTENANCE", GLITCH_ON).await);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
