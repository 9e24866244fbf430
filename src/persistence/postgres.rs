//! PostgreSQL storage adapter

use crate::domain::{Account, Activity, Customer, Symbol, TradeRequest, TradeState};
use crate::error::{Result, TradeGuardError};
use crate::idempotency::{BeginOutcome, IdempotencyStore};
use crate::resilience::with_reconnect;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn activity_from_row(row: &sqlx::postgres::PgRow) -> Result<Activity> {
        let transaction_type: String = row.get("transaction_type");
        let status: String = row.get("status");
        Ok(Activity {
            request_id: row.get("request_id"),
            customer_id: row.get("customer_id"),
            ticker: row.get("ticker"),
            transaction_type: transaction_type
                .parse()
                .map_err(TradeGuardError::Internal)?,
            status: status.parse().map_err(TradeGuardError::Internal)?,
            current_price: row.get("current_price"),
            share_count: row.get("share_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn try_begin(&self, key: &str, expires_at: DateTime<Utc>) -> Result<BeginOutcome> {
        // Conditional write: wins only when no record exists or the existing
        // one has expired. This is the cross-instance mutual-exclusion point.
        let claimed = with_reconnect("idempotency_begin", || async {
            let row = sqlx::query(
                r#"
                INSERT INTO idempotency (key, status, result, expires_at)
                VALUES ($1, 'in-progress', NULL, $2)
                ON CONFLICT (key) DO UPDATE
                    SET status = 'in-progress', result = NULL, expires_at = $2
                    WHERE idempotency.expires_at <= NOW()
                RETURNING key
                "#,
            )
            .bind(key)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.is_some())
        })
        .await?;

        if claimed {
            debug!("Claimed idempotency key {}", key);
            return Ok(BeginOutcome::Started);
        }

        // Lost the race or the record is live: inspect it
        let row = with_reconnect("idempotency_inspect", || async {
            let row = sqlx::query(
                r#"SELECT status, result FROM idempotency WHERE key = $1 AND expires_at > NOW()"#,
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await?;

        match row {
            Some(row) => {
                let status: String = row.get("status");
                if status == "completed" {
                    let result: Option<serde_json::Value> = row.get("result");
                    Ok(BeginOutcome::Completed(
                        result.unwrap_or(serde_json::Value::Null),
                    ))
                } else {
                    Ok(BeginOutcome::InFlight)
                }
            }
            // Record vanished between the two statements (expiry/cleanup
            // race); treat as a concurrent writer and let redelivery retry
            None => Ok(BeginOutcome::InFlight),
        }
    }

    async fn complete(&self, key: &str, result: serde_json::Value) -> Result<()> {
        with_reconnect("idempotency_complete", || {
            let result = result.clone();
            async move {
                sqlx::query(
                    r#"UPDATE idempotency SET status = 'completed', result = $2 WHERE key = $1"#,
                )
                .bind(key)
                .bind(result)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        with_reconnect("idempotency_remove", || async {
            sqlx::query(r#"DELETE FROM idempotency WHERE key = $1"#)
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl crate::persistence::AccountStore for PostgresStore {
    async fn put_account(&self, account: &Account) -> Result<()> {
        let beneficiaries = serde_json::to_value(&account.beneficiaries)?;
        let suitability = serde_json::to_value(&account.suitability)?;
        let instructions = serde_json::to_value(&account.instructions)?;

        with_reconnect("put_account", || {
            let (beneficiaries, suitability, instructions) = (
                beneficiaries.clone(),
                suitability.clone(),
                instructions.clone(),
            );
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO accounts (
                        account_id, user_id, request_token,
                        customer_first_name, customer_last_name,
                        account_type, comment,
                        beneficiaries, suitability, instructions
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ON CONFLICT (user_id, request_token) DO NOTHING
                    "#,
                )
                .bind(&account.account_id)
                .bind(&account.user_id)
                .bind(&account.request_token)
                .bind(&account.customer_first_name)
                .bind(&account.customer_last_name)
                .bind(&account.account_type)
                .bind(&account.comment)
                .bind(beneficiaries)
                .bind(suitability)
                .bind(instructions)
                .execute(&self.pool)
                .await?;
                Ok(())
            }
        })
        .await
    }

    async fn find_account_id(
        &self,
        user_id: &str,
        request_token: &str,
    ) -> Result<Option<String>> {
        with_reconnect("find_account_id", || async {
            let row = sqlx::query(
                r#"SELECT account_id FROM accounts WHERE user_id = $1 AND request_token = $2"#,
            )
            .bind(user_id)
            .bind(request_token)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(|r| r.get("account_id")))
        })
        .await
    }
}

#[async_trait]
impl crate::persistence::TradeStore for PostgresStore {
    async fn ping(&self) -> Result<()> {
        with_reconnect("ping", || async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn symbol(&self, ticker: &str) -> Result<Symbol> {
        let row = with_reconnect("symbol", || async {
            let row = sqlx::query(
                r#"SELECT ticker, open, high, low, close, volume FROM symbol WHERE ticker = $1"#,
            )
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await?
        .ok_or_else(|| TradeGuardError::SymbolNotFound(ticker.to_string()))?;

        Ok(Symbol {
            ticker: row.get("ticker"),
            open: row.get("open"),
            high: row.get("high"),
            low: row.get("low"),
            close: row.get("close"),
            volume: row.get("volume"),
        })
    }

    async fn customer(&self, customer_id: &str) -> Result<Customer> {
        let row = with_reconnect("customer", || async {
            let row = sqlx::query(
                r#"SELECT id, first_name, last_name FROM customer WHERE id = $1"#,
            )
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await?
        .ok_or_else(|| TradeGuardError::CustomerNotFound(customer_id.to_string()))?;

        Ok(Customer {
            id: row.get("id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
        })
    }

    async fn available_balance(&self, customer_id: &str) -> Result<Decimal> {
        // Customers have no deposit accounts in this system; balance is
        // simulated the way the seed environment does it.
        self.customer(customer_id).await?;
        let balance = rand::thread_rng().gen_range(5_000..1_000_000);
        Ok(Decimal::from(balance))
    }

    async fn insert_submitted(&self, request: &TradeRequest) -> Result<Activity> {
        with_reconnect("insert_submitted", || async {
            sqlx::query(
                r#"
                INSERT INTO activity (
                    request_id, customer_id, ticker, transaction_type,
                    status, current_price, share_count, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, 'submitted', $5, $6, NOW(), NOW())
                ON CONFLICT (request_id) DO NOTHING
                "#,
            )
            .bind(&request.request_id)
            .bind(&request.customer_id)
            .bind(&request.ticker)
            .bind(request.transaction_type.to_string())
            .bind(request.current_price)
            .bind(request.share_count)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        // Covers both the fresh insert and the duplicate-resume case
        let row = with_reconnect("fetch_activity", || async {
            let row = sqlx::query(r#"SELECT * FROM activity WHERE request_id = $1"#)
                .bind(&request.request_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(row)
        })
        .await?;

        Self::activity_from_row(&row)
    }

    async fn set_status(&self, request_id: &str, status: TradeState) -> Result<Activity> {
        // The status guard keeps terminal rows immutable
        with_reconnect("set_status", || async {
            sqlx::query(
                r#"
                UPDATE activity
                SET status = $2, updated_at = NOW()
                WHERE request_id = $1 AND status IN ('submitted', 'pending')
                "#,
            )
            .bind(request_id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        let row = with_reconnect("fetch_activity", || async {
            let row = sqlx::query(r#"SELECT * FROM activity WHERE request_id = $1"#)
                .bind(request_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(row)
        })
        .await?;

        Self::activity_from_row(&row)
    }
}
