pub mod config;
pub mod confirms;
pub mod domain;
pub mod engine;
pub mod error;
pub mod failover;
pub mod idempotency;
pub mod persistence;
pub mod processor;
pub mod resilience;
pub mod services;

pub use config::{AppConfig, RegionRole};
pub use confirms::{ConfirmsClient, ExchangeSimulator, HttpConfirmsClient, SimulatorConfirmsClient};
pub use engine::OrderEngine;
pub use error::{ConfirmsError, Result, TradeGuardError};
pub use failover::{HttpMarkerStore, MarkerModeProvider, MarkerStore, MemoryMarkerStore, ModeProvider};
pub use idempotency::{IdempotencyGuard, IdempotencyStore};
pub use persistence::{AccountStore, MemoryStore, PostgresStore, TradeStore};
pub use processor::{BatchResponse, EventRecord, EventSource, MessageProcessor};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
