//! Storage contracts and implementations
//!
//! The durable table service is modeled only through the traits the core
//! needs: account writes with a (user_id, request_token) secondary lookup,
//! trade reads/writes with a unique request_id constraint, and the
//! idempotency record store. Postgres backs production; the in-memory
//! store backs tests and local runs.

pub mod memory;
pub mod postgres;

use crate::domain::{Account, Activity, Customer, Symbol, TradeRequest, TradeState};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Account persistence with the secondary idempotency lookup
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Persist a newly created account. Accounts are write-once.
    async fn put_account(&self, account: &Account) -> Result<()>;

    /// Point lookup on the (user_id, request_token) secondary index
    async fn find_account_id(&self, user_id: &str, request_token: &str)
        -> Result<Option<String>>;
}

/// Trade persistence used by the order state machine
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Connectivity probe for the database health endpoint
    async fn ping(&self) -> Result<()>;

    /// Live quote lookup
    async fn symbol(&self, ticker: &str) -> Result<Symbol>;

    /// Customer lookup
    async fn customer(&self, customer_id: &str) -> Result<Customer>;

    /// Cash available for purchasing
    async fn available_balance(&self, customer_id: &str) -> Result<Decimal>;

    /// Insert the activity as `submitted`. The unique request_id constraint
    /// makes this idempotent: a duplicate insert returns the existing row
    /// instead of failing.
    async fn insert_submitted(&self, request: &TradeRequest) -> Result<Activity>;

    /// Advance the activity's status, returning the updated row. Terminal
    /// states are never reverted; advancing a terminal row is a no-op that
    /// returns the row as stored.
    async fn set_status(&self, request_id: &str, status: TradeState) -> Result<Activity>;
}
