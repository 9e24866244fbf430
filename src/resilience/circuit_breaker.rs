//! Circuit breaker for the trade confirmation dependency
//!
//! Shields a volatile downstream from sustained load while it is unhealthy.
//! State is shared in-process only; each instance learns dependency health
//! independently.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through, failures counted
    Closed,
    /// Failure threshold exceeded - calls short-circuited
    Open,
    /// Recovery period - a single trial call is admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures to trip the circuit
    pub failure_threshold: u32,
    /// Time to wait before transitioning from Open to HalfOpen (seconds)
    pub recovery_timeout_secs: u64,
    /// Per-call timeout, independent of the breaker
    pub call_timeout: std::time::Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            call_timeout: std::time::Duration::from_millis(300),
        }
    }
}

impl From<&crate::config::BreakerConfig> for CircuitBreakerConfig {
    fn from(cfg: &crate::config::BreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            recovery_timeout_secs: cfg.recovery_timeout_secs,
            call_timeout: cfg.call_timeout(),
        }
    }
}

/// How an error counts against the breaker.
///
/// Implemented for the dependency's closed error taxonomy so failure
/// accounting is a total function of the error tag.
pub trait BreakerClassify {
    /// Whether the error indicates dependency ill-health
    fn counts_as_failure(&self) -> bool;

    /// Error value representing an elapsed call timeout
    fn from_timeout(elapsed_ms: u64) -> Self;
}

impl BreakerClassify for crate::error::ConfirmsError {
    fn counts_as_failure(&self) -> bool {
        crate::error::ConfirmsError::counts_as_failure(self)
    }

    fn from_timeout(elapsed_ms: u64) -> Self {
        crate::error::ConfirmsError::Timeout { elapsed_ms }
    }
}

/// Error returned by a breaker-gated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// Short-circuited without contacting the dependency
    Open { retry_in_secs: u64 },
    /// The dependency call itself failed
    Inner(E),
}

impl From<BreakerError<crate::error::ConfirmsError>> for crate::error::TradeGuardError {
    fn from(err: BreakerError<crate::error::ConfirmsError>) -> Self {
        match err {
            BreakerError::Open { retry_in_secs } => {
                crate::error::TradeGuardError::CircuitOpen { retry_in_secs }
            }
            BreakerError::Inner(e) => crate::error::TradeGuardError::Confirms(e),
        }
    }
}

/// Circuit breaker guarding one downstream dependency
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    opened_at: RwLock<Option<DateTime<Utc>>>,
    trial_in_flight: AtomicBool,
    total_trips: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: RwLock::new(None),
            trial_in_flight: AtomicBool::new(false),
            total_trips: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Current state, promoting Open to HalfOpen once the recovery timeout
    /// has elapsed.
    pub async fn state(&self) -> CircuitState {
        let state = *self.state.read().await;
        if state == CircuitState::Open && self.recovery_elapsed().await {
            self.transition_to_half_open().await;
            return *self.state.read().await;
        }
        state
    }

    /// Whether calls are currently short-circuited
    pub async fn is_open(&self) -> bool {
        self.state().await == CircuitState::Open
    }

    /// Run `op` through the breaker with the per-call timeout applied.
    ///
    /// Open circuits reject immediately. In HalfOpen exactly one concurrent
    /// trial is admitted; others are rejected as if the circuit were open.
    /// A trial whose future is dropped mid-flight (cancelled handler,
    /// aborted task) releases the slot so the next call can take over.
    pub async fn call<T, E, Fut>(&self, op: Fut) -> Result<T, BreakerError<E>>
    where
        E: BreakerClassify,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = match self.acquire().await {
            Ok(trial) => trial,
            Err(retry_in_secs) => return Err(BreakerError::Open { retry_in_secs }),
        };
        let mut trial_guard = if trial { Some(TrialSlotGuard(self)) } else { None };

        let result = match tokio::time::timeout(self.config.call_timeout, op).await {
            Ok(inner) => inner,
            Err(_) => Err(E::from_timeout(self.config.call_timeout.as_millis() as u64)),
        };

        // The call ran to an outcome; from here the slot is settled by
        // record_success/record_failure, not by the cancellation guard
        if let Some(guard) = trial_guard.take() {
            guard.disarm();
        }

        match result {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(e) if e.counts_as_failure() => {
                self.record_failure().await;
                Err(BreakerError::Inner(e))
            }
            Err(e) => {
                // The dependency answered; a business rejection says nothing
                // about its health. A HalfOpen trial that got an answer
                // closes the circuit.
                if trial {
                    self.record_success().await;
                }
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admission control. `Ok(true)` marks the admitted call as the HalfOpen
    /// trial; `Err` carries seconds until the next recovery attempt.
    async fn acquire(&self) -> Result<bool, u64> {
        match self.state().await {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen => {
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    debug!("Admitting half-open trial call");
                    Ok(true)
                } else {
                    Err(0)
                }
            }
            CircuitState::Open => Err(self.time_until_recovery().await),
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);

        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            *self.opened_at.write().await = None;
            self.trial_in_flight.store(false, Ordering::SeqCst);
            info!("Circuit breaker CLOSED - dependency recovered");
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let state = *self.state.read().await;
        if state == CircuitState::HalfOpen {
            // Trial failed: back to Open with a fresh timer
            self.trip().await;
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        warn!("Confirms call failure #{}", failures);
        if failures >= self.config.failure_threshold {
            self.trip().await;
        }
    }

    /// Trip the circuit open
    async fn trip(&self) {
        let mut state = self.state.write().await;
        if *state != CircuitState::Open {
            *state = CircuitState::Open;
            *self.opened_at.write().await = Some(Utc::now());
            self.trial_in_flight.store(false, Ordering::SeqCst);
            self.total_trips.fetch_add(1, Ordering::SeqCst);
            warn!(
                "Circuit breaker TRIPPED after {} consecutive failures",
                self.consecutive_failures.load(Ordering::SeqCst)
            );
        }
    }

    async fn transition_to_half_open(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::Open {
            *state = CircuitState::HalfOpen;
            self.trial_in_flight.store(false, Ordering::SeqCst);
            info!("Circuit breaker transitioning to HALF-OPEN");
        }
    }

    async fn recovery_elapsed(&self) -> bool {
        if let Some(opened_at) = *self.opened_at.read().await {
            let elapsed = Utc::now().signed_duration_since(opened_at).num_seconds();
            elapsed >= 0 && elapsed as u64 >= self.config.recovery_timeout_secs
        } else {
            false
        }
    }

    async fn time_until_recovery(&self) -> u64 {
        if let Some(opened_at) = *self.opened_at.read().await {
            let elapsed = Utc::now()
                .signed_duration_since(opened_at)
                .num_seconds()
                .max(0) as u64;
            self.config.recovery_timeout_secs.saturating_sub(elapsed)
        } else {
            self.config.recovery_timeout_secs
        }
    }

    /// Get circuit breaker statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: *self.state.read().await,
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            opened_at: *self.opened_at.read().await,
            total_trips: self.total_trips.load(Ordering::SeqCst),
        }
    }
}

/// Releases the half-open trial slot if the gated call never reached an
/// outcome (its future was dropped at an await point).
struct TrialSlotGuard<'a>(&'a CircuitBreaker);

impl TrialSlotGuard<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for TrialSlotGuard<'_> {
    fn drop(&mut self) {
        self.0.trial_in_flight.store(false, Ordering::SeqCst);
        debug!("Half-open trial abandoned mid-flight, releasing the slot");
    }
}

/// Statistics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub total_trips: u64,
}
