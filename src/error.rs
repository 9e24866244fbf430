use thiserror::Error;

/// Main error type for the resilience core
#[derive(Error, Debug)]
pub enum TradeGuardError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Idempotency errors
    #[error("Missing idempotency key")]
    MissingIdempotencyKey,

    #[error("Concurrent execution in progress for key: {key}")]
    ConcurrentExecution { key: String },

    // Circuit breaker errors
    #[error("Circuit open, {retry_in_secs}s until recovery")]
    CircuitOpen { retry_in_secs: u64 },

    // Confirmation dependency errors
    #[error("Trade confirmation failed: {0}")]
    Confirms(#[from] ConfirmsError),

    // Failover errors
    #[error("Failover marker probe failed: {0}")]
    FailoverProbe(String),

    // Lookup errors
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Account not found for user {user_id}")]
    AccountNotFound { user_id: String },

    // Event processing errors
    #[error("Malformed event payload: {0}")]
    MalformedEvent(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for TradeGuardError
pub type Result<T> = std::result::Result<T, TradeGuardError>;

/// Failure taxonomy of the trade confirmation dependency.
///
/// A closed set of tags so the circuit breaker's failure accounting is a
/// total function of the tag rather than of an exception hierarchy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmsError {
    /// Dependency declared itself unavailable (exchange in maintenance, HTTP 503)
    #[error("Confirms unavailable: {0}")]
    Maintenance(String),

    /// Intermittent processing glitch on the dependency side (HTTP 500)
    #[error("Confirms processing glitch: {0}")]
    Glitch(String),

    /// Request timed out before the dependency answered
    #[error("Confirms call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Could not reach the dependency at all
    #[error("Confirms transport error: {0}")]
    Transport(String),

    /// Dependency processed the request and rejected it (business rejection)
    #[error("Trade rejected by confirms: status {status}")]
    Rejected { status: u16 },
}

impl ConfirmsError {
    /// Whether this error counts toward the circuit breaker's failure
    /// threshold. Business rejections were processed by the dependency and
    /// say nothing about its health.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, ConfirmsError::Rejected { .. })
    }
}
