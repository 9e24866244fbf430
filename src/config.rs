use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub region: RegionConfig,
    pub idempotency: IdempotencyConfig,
    pub breaker: BreakerConfig,
    pub confirms: ConfirmsConfig,
    pub processor: ProcessorConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Port served by the selected role (default: 8080)
    #[serde(default)]
    pub port: Option<u16>,
}

/// Which role this deployment is designated to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionRole {
    /// Normally-active region
    Primary,
    /// Standby region that takes over when the failover marker is set
    Recovery,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionConfig {
    /// Static designation of this deployment
    pub role: RegionRole,
    /// Base URL of the region-scoped marker store probed for failover state
    pub marker_store_url: String,
    /// Well-known object key whose presence signals "this region is passive"
    #[serde(default = "default_marker_key")]
    pub marker_key: String,
}

fn default_marker_key() -> String {
    "failover.txt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// Seconds before an idempotency record expires (default: 3 hours)
    #[serde(default = "default_idempotency_ttl")]
    pub ttl_secs: u64,
}

fn default_idempotency_ttl() -> u64 {
    60 * 60 * 3
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_idempotency_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds to wait in Open before admitting a half-open trial
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    /// Per-call timeout in milliseconds, independent of the breaker
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60
}

fn default_call_timeout() -> u64 {
    300
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            call_timeout_ms: default_call_timeout(),
        }
    }
}

impl BreakerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmsConfig {
    /// Base URL of the trade confirmation dependency
    pub endpoint: String,
    /// How many confirm calls between re-reads of the chaos parameters
    /// (simulator only)
    #[serde(default = "default_refresh_every")]
    pub refresh_every: u64,
}

fn default_refresh_every() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Maximum records processed concurrently within one batch
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    8
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("idempotency.ttl_secs", default_idempotency_ttl())?
            .set_default("breaker.failure_threshold", default_failure_threshold())?
            .set_default("breaker.recovery_timeout_secs", default_recovery_timeout())?
            .set_default("breaker.call_timeout_ms", default_call_timeout())?
            .set_default("confirms.refresh_every", default_refresh_every())?
            .set_default("processor.max_concurrency", default_max_concurrency() as u64)?
            .set_default("database.max_connections", default_max_connections())?
            .set_default("region.marker_key", default_marker_key())?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("TRADEGUARD_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (TRADEGUARD_REGION__ROLE, etc.)
            .add_source(
                Environment::with_prefix("TRADEGUARD")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.breaker.failure_threshold == 0 {
            errors.push("breaker.failure_threshold must be at least 1".to_string());
        }

        if self.breaker.call_timeout_ms >= self.breaker.recovery_timeout_secs * 1000 {
            errors.push(
                "breaker.call_timeout_ms must be shorter than the recovery timeout".to_string(),
            );
        }

        if self.idempotency.ttl_secs == 0 {
            errors.push("idempotency.ttl_secs must be positive".to_string());
        }

        if self.processor.max_concurrency == 0 {
            errors.push("processor.max_concurrency must be at least 1".to_string());
        }

        if self.confirms.refresh_every == 0 {
            errors.push("confirms.refresh_every must be at least 1".to_string());
        }

        if self.region.marker_key.is_empty() {
            errors.push("region.marker_key must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
