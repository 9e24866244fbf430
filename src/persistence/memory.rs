//! In-memory store for tests and local single-binary runs

use crate::domain::{Account, Activity, Customer, Symbol, TradeRequest, TradeState};
use crate::error::{Result, TradeGuardError};
use crate::idempotency::{BeginOutcome, IdempotencyRecord, IdempotencyStatus, IdempotencyStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// DashMap-backed implementation of every store trait. The entry API gives
/// the same conditional-write atomicity the durable store provides.
#[derive(Default)]
pub struct MemoryStore {
    idempotency: DashMap<String, IdempotencyRecord>,
    accounts: DashMap<String, Account>,
    account_index: DashMap<(String, String), String>,
    symbols: DashMap<String, Symbol>,
    customers: DashMap<String, Customer>,
    balances: DashMap<String, Decimal>,
    activities: DashMap<String, Activity>,
    account_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Test/seed helpers ====================

    pub fn seed_symbol(&self, symbol: Symbol) {
        self.symbols.insert(symbol.ticker.clone(), symbol);
    }

    pub fn seed_customer(&self, customer: Customer, balance: Decimal) {
        self.balances.insert(customer.id.clone(), balance);
        self.customers.insert(customer.id.clone(), customer);
    }

    /// How many times an account row was actually written (side-effect
    /// counter for idempotency verification)
    pub fn account_writes(&self) -> u64 {
        self.account_writes.load(Ordering::SeqCst)
    }

    pub fn activity(&self, request_id: &str) -> Option<Activity> {
        self.activities.get(request_id).map(|a| a.clone())
    }

    pub fn account(&self, account_id: &str) -> Option<Account> {
        self.accounts.get(account_id).map(|a| a.clone())
    }

    /// Force an idempotency record's expiry into the past (TTL tests)
    pub fn expire_idempotency_record(&self, key: &str) {
        if let Some(mut record) = self.idempotency.get_mut(key) {
            record.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn try_begin(&self, key: &str, expires_at: DateTime<Utc>) -> Result<BeginOutcome> {
        let now = Utc::now();
        match self.idempotency.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(IdempotencyRecord {
                        key: key.to_string(),
                        status: IdempotencyStatus::InProgress,
                        result: None,
                        expires_at,
                    });
                    return Ok(BeginOutcome::Started);
                }
                match occupied.get().status {
                    IdempotencyStatus::Completed => Ok(BeginOutcome::Completed(
                        occupied
                            .get()
                            .result
                            .clone()
                            .unwrap_or(serde_json::Value::Null),
                    )),
                    IdempotencyStatus::InProgress => Ok(BeginOutcome::InFlight),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(IdempotencyRecord {
                    key: key.to_string(),
                    status: IdempotencyStatus::InProgress,
                    result: None,
                    expires_at,
                });
                Ok(BeginOutcome::Started)
            }
        }
    }

    async fn complete(&self, key: &str, result: serde_json::Value) -> Result<()> {
        match self.idempotency.get_mut(key) {
            Some(mut record) => {
                record.status = IdempotencyStatus::Completed;
                record.result = Some(result);
                Ok(())
            }
            None => Err(TradeGuardError::Internal(format!(
                "no in-progress idempotency record for {}",
                key
            ))),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.idempotency.remove(key);
        Ok(())
    }
}

#[async_trait]
impl crate::persistence::AccountStore for MemoryStore {
    async fn put_account(&self, account: &Account) -> Result<()> {
        self.account_index.insert(
            (account.user_id.clone(), account.request_token.clone()),
            account.account_id.clone(),
        );
        self.accounts
            .insert(account.account_id.clone(), account.clone());
        self.account_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_account_id(
        &self,
        user_id: &str,
        request_token: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .account_index
            .get(&(user_id.to_string(), request_token.to_string()))
            .map(|id| id.clone()))
    }
}

#[async_trait]
impl crate::persistence::TradeStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn symbol(&self, ticker: &str) -> Result<Symbol> {
        self.symbols
            .get(ticker)
            .map(|s| s.clone())
            .ok_or_else(|| TradeGuardError::SymbolNotFound(ticker.to_string()))
    }

    async fn customer(&self, customer_id: &str) -> Result<Customer> {
        self.customers
            .get(customer_id)
            .map(|c| c.clone())
            .ok_or_else(|| TradeGuardError::CustomerNotFound(customer_id.to_string()))
    }

    async fn available_balance(&self, customer_id: &str) -> Result<Decimal> {
        self.balances
            .get(customer_id)
            .map(|b| *b)
            .ok_or_else(|| TradeGuardError::CustomerNotFound(customer_id.to_string()))
    }

    async fn insert_submitted(&self, request: &TradeRequest) -> Result<Activity> {
        match self.activities.entry(request.request_id.clone()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let activity = Activity::from_request(request);
                vacant.insert(activity.clone());
                Ok(activity)
            }
        }
    }

    async fn set_status(&self, request_id: &str, status: TradeState) -> Result<Activity> {
        let mut activity = self
            .activities
            .get_mut(request_id)
            .ok_or_else(|| TradeGuardError::Internal(format!("unknown activity {}", request_id)))?;

        if !activity.status.is_terminal() {
            activity.status = status;
            activity.updated_at = Utc::now();
        }
        Ok(activity.clone())
    }
}
