//! Trade submission API

use crate::confirms::ConfirmsClient;
use crate::engine::OrderEngine;
use crate::error::TradeGuardError;
use crate::persistence::TradeStore;
use crate::resilience::CircuitBreaker;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for the order API
pub struct OrderApiState {
    pub engine: OrderEngine<dyn TradeStore, dyn ConfirmsClient>,
    pub store: Arc<dyn TradeStore>,
    pub confirms: Arc<dyn ConfirmsClient>,
    pub breaker: Arc<CircuitBreaker>,
}

impl OrderApiState {
    pub fn new(
        store: Arc<dyn TradeStore>,
        confirms: Arc<dyn ConfirmsClient>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            engine: OrderEngine::new(
                Arc::clone(&store),
                Arc::clone(&confirms),
                Arc::clone(&breaker),
            ),
            store,
            confirms,
            breaker,
        }
    }
}

pub fn order_router(state: Arc<OrderApiState>) -> Router {
    Router::new()
        .route("/trade/", post(trade_handler))
        .route("/", get(health_handler))
        .route("/exchange-health/", get(exchange_health_handler))
        .route("/db-health/", get(db_health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Order API server
pub struct OrderApiServer {
    state: Arc<OrderApiState>,
    port: u16,
}

impl OrderApiServer {
    pub fn new(state: Arc<OrderApiState>, port: u16) -> Self {
        Self { state, port }
    }

    pub async fn run(&self) -> crate::error::Result<()> {
        let app = order_router(Arc::clone(&self.state));
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting order API on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| TradeGuardError::Internal(format!("Order API server error: {}", e)))?;
        Ok(())
    }
}

fn error_status(e: &TradeGuardError) -> StatusCode {
    match e {
        TradeGuardError::Validation(_)
        | TradeGuardError::MalformedEvent(_)
        | TradeGuardError::MissingIdempotencyKey => StatusCode::BAD_REQUEST,
        TradeGuardError::CustomerNotFound(_)
        | TradeGuardError::SymbolNotFound(_)
        | TradeGuardError::AccountNotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Submit a trade and run it to a terminal state
async fn trade_handler(
    State(state): State<Arc<OrderApiState>>,
    Json(request): Json<crate::domain::TradeRequest>,
) -> impl IntoResponse {
    match state.engine.place_trade(&request).await {
        Ok(activity) => (StatusCode::OK, Json(json!(activity))),
        Err(e) => (error_status(&e), Json(json!({ "error": e.to_string() }))),
    }
}

/// Shallow health for the load balancer; also logs the breaker state so
/// operators can watch trips from the access log.
async fn health_handler(State(state): State<Arc<OrderApiState>>) -> impl IntoResponse {
    let breaker_state = state.breaker.state().await;
    info!(breaker = %breaker_state, "Call to / it's OK");
    "OK"
}

/// Deep health: can this service reach the confirms dependency?
async fn exchange_health_handler(State(state): State<Arc<OrderApiState>>) -> impl IntoResponse {
    match state.confirms.exchange_health().await {
        Ok(health) if health.available => (StatusCode::OK, health.message),
        Ok(health) => (StatusCode::SERVICE_UNAVAILABLE, health.message),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// Deep health: can this service reach its database?
async fn db_health_handler(State(state): State<Arc<OrderApiState>>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirms::{ExchangeSimulator, SimulatorConfirmsClient, StaticParameters};
    use crate::domain::{Customer, Symbol};
    use crate::persistence::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use tower::util::ServiceExt;

    async fn test_state() -> Arc<OrderApiState> {
        let store = Arc::new(MemoryStore::new());
        store.seed_symbol(Symbol {
            ticker: "AMZN".to_string(),
            open: dec!(100),
            high: dec!(105),
            low: dec!(99),
            close: dec!(101.50),
            volume: 1_000_000,
        });
        store.seed_customer(
            Customer {
                id: "c-1".to_string(),
                first_name: "Kevin".to_string(),
                last_name: "Mitnick".to_string(),
            },
            dec!(50_000),
        );

        let simulator = Arc::new(
            ExchangeSimulator::new(Arc::new(StaticParameters::healthy()), 10)
                .await
                .unwrap(),
        );
        Arc::new(OrderApiState::new(
            store,
            Arc::new(SimulatorConfirmsClient::new(simulator)),
            Arc::new(CircuitBreaker::with_defaults()),
        ))
    }

    #[tokio::test]
    async fn shallow_health_returns_ok() {
        let app = order_router(test_state().await);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn trade_endpoint_returns_filled_activity() {
        let app = order_router(test_state().await);
        let body = serde_json::json!({
            "request_id": "r-1",
            "customer_id": "c-1",
            "ticker": "AMZN",
            "transaction_type": "buy",
            "share_count": "10",
            "current_price": "101.50",
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/trade/")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let activity: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(activity["status"], "filled");
        assert_eq!(activity["request_id"], "r-1");
    }

    #[tokio::test]
    async fn unknown_symbol_returns_not_found() {
        let app = order_router(test_state().await);
        let body = serde_json::json!({
            "request_id": "r-2",
            "customer_id": "c-1",
            "ticker": "NOPE",
            "transaction_type": "buy",
            "share_count": "10",
            "current_price": "101.50",
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/trade/")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn db_health_reports_ok_for_live_store() {
        let app = order_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/db-health/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn exchange_health_proxies_the_dependency() {
        let app = order_router(test_state().await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/exchange-health/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
