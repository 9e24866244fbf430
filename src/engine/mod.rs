//! Order state machine
//!
//! Evaluates a trade request against live price and funds checks and the
//! circuit breaker, persisting every transition. Activities always land in
//! a terminal state; resubmission with the same request_id resumes against
//! the persisted row instead of duplicating it.

use crate::confirms::ConfirmsClient;
use crate::domain::{Activity, TradeRequest, TradeState};
use crate::error::Result;
use crate::persistence::TradeStore;
use crate::resilience::CircuitBreaker;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct OrderEngine<S: ?Sized, C: ?Sized> {
    store: Arc<S>,
    confirms: Arc<C>,
    breaker: Arc<CircuitBreaker>,
}

impl<S, C> OrderEngine<S, C>
where
    S: TradeStore + ?Sized,
    C: ConfirmsClient + ?Sized,
{
    pub fn new(store: Arc<S>, confirms: Arc<C>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            store,
            confirms,
            breaker,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Evaluate and persist a trade request to a terminal state.
    ///
    /// Unhandled evaluation errors force the activity to `aborted` before
    /// surfacing; the caller resubmits with the same request_id, which the
    /// unique-constraint insert makes safe.
    pub async fn place_trade(&self, request: &TradeRequest) -> Result<Activity> {
        match self.evaluate(request).await {
            Ok(activity) => Ok(activity),
            Err(e) => {
                error!(
                    request_id = %request.request_id,
                    "Trade evaluation failed, forcing aborted: {}", e
                );
                if let Err(abort_err) = self
                    .store
                    .set_status(&request.request_id, TradeState::Aborted)
                    .await
                {
                    warn!(
                        request_id = %request.request_id,
                        "Could not persist aborted fallback: {}", abort_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn evaluate(&self, request: &TradeRequest) -> Result<Activity> {
        let symbol = self.store.symbol(&request.ticker).await?;
        let customer = self.store.customer(&request.customer_id).await?;
        let balance = self.store.available_balance(&customer.id).await?;

        let activity = self.store.insert_submitted(request).await?;
        if activity.status.is_terminal() {
            info!(
                request_id = %request.request_id,
                status = %activity.status,
                "Activity already terminal, reusing persisted result"
            );
            return Ok(activity);
        }

        if self.breaker.is_open().await {
            info!(
                request_id = %request.request_id,
                "Circuit open, aborting because orders cannot be filled"
            );
            return self
                .store
                .set_status(&request.request_id, TradeState::Aborted)
                .await;
        }

        let cost = symbol.close * request.share_count;
        let price_matches = symbol.close == request.current_price;
        if !price_matches || balance < cost {
            info!(
                request_id = %request.request_id,
                price_matches,
                "Stale price or insufficient funds, rejecting"
            );
            return self
                .store
                .set_status(&request.request_id, TradeState::Rejected)
                .await;
        }

        let activity = self
            .store
            .set_status(&request.request_id, TradeState::Pending)
            .await?;

        match self.breaker.call(self.confirms.confirm_trade(&activity)).await {
            Ok(()) => {
                info!(request_id = %request.request_id, "Trade confirmed, filling");
                self.store
                    .set_status(&request.request_id, TradeState::Filled)
                    .await
            }
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    "Confirmation call failed, aborting: {:?}", e
                );
                self.store
                    .set_status(&request.request_id, TradeState::Aborted)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirms::ExchangeHealth;
    use crate::domain::{Customer, Symbol, TransactionType};
    use crate::error::ConfirmsError;
    use crate::persistence::MemoryStore;
    use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedConfirms {
        script: Mutex<Vec<std::result::Result<(), ConfirmsError>>>,
        calls: AtomicU32,
    }

    impl ScriptedConfirms {
        fn always_ok() -> Self {
            Self {
                script: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            }
        }

        fn failing_with(fault: ConfirmsError, times: usize) -> Self {
            Self {
                script: Mutex::new(vec![Err(fault); times]),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConfirmsClient for ScriptedConfirms {
        async fn confirm_trade(
            &self,
            _activity: &Activity,
        ) -> std::result::Result<(), ConfirmsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop().unwrap_or(Ok(()))
        }

        async fn exchange_health(&self) -> Result<ExchangeHealth> {
            Ok(ExchangeHealth {
                available: true,
                message: "ok".to_string(),
            })
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
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
        store
    }

    fn request(id: &str, price: rust_decimal::Decimal) -> TradeRequest {
        TradeRequest {
            request_id: id.to_string(),
            customer_id: "c-1".to_string(),
            ticker: "AMZN".to_string(),
            transaction_type: TransactionType::Buy,
            share_count: dec!(10),
            current_price: price,
        }
    }

    fn engine(
        store: Arc<MemoryStore>,
        confirms: Arc<ScriptedConfirms>,
        breaker: Arc<CircuitBreaker>,
    ) -> OrderEngine<MemoryStore, ScriptedConfirms> {
        OrderEngine::new(store, confirms, breaker)
    }

    #[tokio::test]
    async fn matching_price_and_funds_fills() {
        let store = seeded_store();
        let confirms = Arc::new(ScriptedConfirms::always_ok());
        let e = engine(
            Arc::clone(&store),
            Arc::clone(&confirms),
            Arc::new(CircuitBreaker::with_defaults()),
        );

        let activity = e.place_trade(&request("r-1", dec!(101.50))).await.unwrap();
        assert_eq!(activity.status, TradeState::Filled);
        assert_eq!(confirms.calls(), 1);
    }

    #[tokio::test]
    async fn stale_price_rejects_without_calling() {
        let store = seeded_store();
        let confirms = Arc::new(ScriptedConfirms::always_ok());
        let e = engine(
            Arc::clone(&store),
            Arc::clone(&confirms),
            Arc::new(CircuitBreaker::with_defaults()),
        );

        let activity = e.place_trade(&request("r-2", dec!(99.00))).await.unwrap();
        assert_eq!(activity.status, TradeState::Rejected);
        assert_eq!(confirms.calls(), 0);
    }

    #[tokio::test]
    async fn insufficient_funds_rejects() {
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
            dec!(100), // cost is 1015.00
        );
        let confirms = Arc::new(ScriptedConfirms::always_ok());
        let e = engine(
            Arc::clone(&store),
            Arc::clone(&confirms),
            Arc::new(CircuitBreaker::with_defaults()),
        );

        let activity = e.place_trade(&request("r-3", dec!(101.50))).await.unwrap();
        assert_eq!(activity.status, TradeState::Rejected);
        assert_eq!(confirms.calls(), 0);
    }

    #[tokio::test]
    async fn open_breaker_aborts_without_calling() {
        let store = seeded_store();
        let confirms = Arc::new(ScriptedConfirms::always_ok());
        let breaker = Arc::new(CircuitBreaker::with_defaults());
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        let e = engine(Arc::clone(&store), Arc::clone(&confirms), breaker);

        let activity = e.place_trade(&request("r-4", dec!(101.50))).await.unwrap();
        assert_eq!(activity.status, TradeState::Aborted);
        assert_eq!(confirms.calls(), 0);
    }

    #[tokio::test]
    async fn confirm_failure_aborts() {
        let store = seeded_store();
        let confirms = Arc::new(ScriptedConfirms::failing_with(
            ConfirmsError::Maintenance("exchange closed".into()),
            1,
        ));
        let e = engine(
            Arc::clone(&store),
            Arc::clone(&confirms),
            Arc::new(CircuitBreaker::with_defaults()),
        );

        let activity = e.place_trade(&request("r-5", dec!(101.50))).await.unwrap();
        assert_eq!(activity.status, TradeState::Aborted);
        assert_eq!(confirms.calls(), 1);
    }

    #[tokio::test]
    async fn resubmission_reuses_terminal_row() {
        let store = seeded_store();
        let confirms = Arc::new(ScriptedConfirms::always_ok());
        let e = engine(
            Arc::clone(&store),
            Arc::clone(&confirms),
            Arc::new(CircuitBreaker::with_defaults()),
        );

        let first = e.place_trade(&request("r-6", dec!(101.50))).await.unwrap();
        assert_eq!(first.status, TradeState::Filled);

        let second = e.place_trade(&request("r-6", dec!(101.50))).await.unwrap();
        assert_eq!(second.status, TradeState::Filled);
        // Confirmation ran exactly once
        assert_eq!(confirms.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_symbol_surfaces_error() {
        let store = Arc::new(MemoryStore::new());
        let confirms = Arc::new(ScriptedConfirms::always_ok());
        let e = engine(
            Arc::clone(&store),
            Arc::clone(&confirms),
            Arc::new(CircuitBreaker::with_defaults()),
        );

        let result = e.place_trade(&request("r-7", dec!(101.50))).await;
        assert!(matches!(
            result,
            Err(crate::error::TradeGuardError::SymbolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn repeated_confirm_failures_trip_breaker_then_fail_fast() {
        let store = seeded_store();
        let confirms = Arc::new(ScriptedConfirms::failing_with(
            ConfirmsError::Glitch("boom".into()),
            10,
        ));
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            call_timeout: std::time::Duration::from_millis(300),
        }));
        let e = engine(Arc::clone(&store), Arc::clone(&confirms), breaker);

        for i in 0..5 {
            let activity = e
                .place_trade(&request(&format!("trip-{}", i), dec!(101.50)))
                .await
                .unwrap();
            assert_eq!(activity.status, TradeState::Aborted);
        }
        assert_eq!(confirms.calls(), 5);

        // 6th trade is aborted up-front without contacting the dependency
        let activity = e.place_trade(&request("trip-5", dec!(101.50))).await.unwrap();
        assert_eq!(activity.status, TradeState::Aborted);
        assert_eq!(confirms.calls(), 5);
    }
}
