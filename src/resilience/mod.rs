pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerClassify, BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
    CircuitState,
};
pub use retry::with_reconnect;
