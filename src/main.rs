use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tradeguard::config::{AppConfig, LoggingConfig};
use tradeguard::confirms::{ExchangeSimulator, HttpConfirmsClient, StaticParameters};
use tradeguard::error::{Result, TradeGuardError};
use tradeguard::failover::{HttpMarkerStore, MarkerModeProvider};
use tradeguard::idempotency::IdempotencyGuard;
use tradeguard::persistence::PostgresStore;
use tradeguard::processor::{EventRecord, MessageProcessor};
use tradeguard::resilience::{CircuitBreaker, CircuitBreakerConfig};
use tradeguard::services::{ConfirmsApiServer, OrderApiServer, OrderApiState};

#[derive(Parser)]
#[command(name = "tradeguard")]
#[command(about = "Multi-region brokerage resilience core", version)]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one batch of account-open events, printing the records to
    /// redeliver as JSON
    Worker {
        /// JSON file holding the event batch; reads stdin when omitted
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Serve the trade submission API
    OrderApi {
        /// Port override
        #[arg(long)]
        port: Option<u16>,
    },
    /// Serve the simulated confirms dependency
    ConfirmsApi {
        /// Port override
        #[arg(long)]
        port: Option<u16>,
        /// Initial exchange status (anything but AVAILABLE fails confirms)
        #[arg(long, default_value = "AVAILABLE")]
        exchange_status: String,
        /// Initial glitch factor (ON fails every third confirm)
        #[arg(long, default_value = "OFF")]
        glitch_factor: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Configuration error: {}", e);
        }
        return Err(TradeGuardError::Validation(errors.join("; ")));
    }

    match cli.command {
        Commands::Worker { events } => run_worker(&config, events).await,
        Commands::OrderApi { port } => run_order_api(&config, port).await,
        Commands::ConfirmsApi {
            port,
            exchange_status,
            glitch_factor,
        } => run_confirms_api(&config, port, &exchange_status, &glitch_factor).await,
    }
}

fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", cfg.level)));

    let log_dir = std::env::var("TRADEGUARD_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "/var/log/tradeguard".to_string());

    // `tracing_appender::rolling::daily` panics if it can't create the
    // initial log file, so preflight writability before attaching it.
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".tradeguard_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "tradeguard.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Keep the guard alive for the life of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .boxed(),
                )
            }
            Err(_) => None,
        }
    } else {
        None
    };

    // Boxed so the JSON and plain stdout formats share one subscriber stack
    let stdout_layer = if cfg.json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

async fn connect_store(config: &AppConfig) -> Result<Arc<PostgresStore>> {
    let store = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    store.migrate().await?;
    Ok(store)
}

/// One batch per invocation, mirroring how the upstream queue runtime
/// drives the consumer. The redelivery report goes to stdout.
async fn run_worker(config: &AppConfig, events: Option<PathBuf>) -> Result<()> {
    let raw = match events {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let batch: Vec<EventRecord> = serde_json::from_str(&raw)?;
    info!(records = batch.len(), "Processing account event batch");

    let store = connect_store(config).await?;
    let marker = Arc::new(HttpMarkerStore::new(config.region.marker_store_url.clone()));
    let mode = Arc::new(MarkerModeProvider::new(
        marker,
        config.region.marker_key.clone(),
    ));
    let guard = IdempotencyGuard::with_ttl_secs(Arc::clone(&store), config.idempotency.ttl_secs);
    let processor = MessageProcessor::new(
        Arc::clone(&store),
        guard,
        mode,
        config.region.role,
        config.processor.max_concurrency,
    );

    let response = processor.process_batch(batch).await?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

async fn run_order_api(config: &AppConfig, port: Option<u16>) -> Result<()> {
    let store = connect_store(config).await?;
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::from(
        &config.breaker,
    )));
    let confirms = Arc::new(HttpConfirmsClient::new(
        config.confirms.endpoint.clone(),
        config.breaker.call_timeout(),
    )?);

    let state = Arc::new(OrderApiState::new(store, confirms, breaker));
    let port = port.or(config.port).unwrap_or(8080);
    let server = OrderApiServer::new(state, port);

    tokio::select! {
        result = server.run() => result,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping order API");
            Ok(())
        }
    }
}

async fn run_confirms_api(
    config: &AppConfig,
    port: Option<u16>,
    exchange_status: &str,
    glitch_factor: &str,
) -> Result<()> {
    let params = Arc::new(StaticParameters::new(exchange_status, glitch_factor));
    let simulator = Arc::new(ExchangeSimulator::new(params, config.confirms.refresh_every).await?);

    let port = port.or(config.port).unwrap_or(8081);
    let server = ConfirmsApiServer::new(simulator, port);

    tokio::select! {
        result = server.run() => result,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping confirms API");
            Ok(())
        }
    }
}
