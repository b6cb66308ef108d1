//! Operator CLI: one-shot and looping connector runs, outbox dispatch,
//! replay, CIK lookup, migrations, and a metrics/health server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tip_adapters::alerts::AlertNotifier;
use tip_adapters::blob::{BlobConfig, S3BlobStore};
use tip_adapters::config::ServiceConfig;
use tip_adapters::metrics::IngestionMetrics;
use tip_adapters::outbox::{OutboxDispatcher, OutboxDispatcherConfig};
use tip_adapters::postgres::PostgresStore;
use tip_adapters::queue::{NatsMessageQueue, NatsQueueConfig};
use tip_adapters::replay::replay;
use tip_connectors::disclosure::{normalize_cik, default_forms_allowlist, DisclosureConfig, DisclosureConnector};
use tip_connectors::forum::{ForumConfig, ForumConnector};
use tip_connectors::framework::{run_once, Mode, RunStats};
use tip_connectors::mock::MockConnector;
use tip_ports::TimestampKey;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tip")]
#[command(about = "Trading intelligence ingestion pipeline operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum CliMode {
    Shadow,
    Emit,
}

impl From<CliMode> for Mode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Shadow => Mode::Shadow,
            CliMode::Emit => Mode::Emit,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum ConnectorSource {
    Edgar,
    Reddit,
    Wsb,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WSB mock connector once.
    RunWsb {
        #[arg(long, value_enum, default_value = "shadow")]
        mode: CliMode,
    },
    /// Run the Reddit forum connector once.
    RunReddit {
        #[arg(long, value_enum, default_value = "shadow")]
        mode: CliMode,
        #[arg(long, env = "TIP_REDDIT_SUBREDDITS", value_delimiter = ',', default_value = "wallstreetbets")]
        subreddits: Vec<String>,
        #[arg(long, env = "TIP_REDDIT_USER_AGENT", default_value = "tip-reddit-connector/0.1")]
        user_agent: String,
    },
    /// Run the EDGAR disclosure connector once.
    RunEdgar {
        #[arg(long, value_enum, default_value = "shadow")]
        mode: CliMode,
        #[arg(long, env = "TIP_EDGAR_CIKS", value_delimiter = ',')]
        ciks: Vec<String>,
        #[arg(long, env = "TIP_EDGAR_USER_AGENT_NAME", default_value = "Trading Intel Platform")]
        user_agent_name: String,
        #[arg(long, env = "TIP_EDGAR_USER_AGENT_EMAIL", default_value = "ops@example.com")]
        user_agent_email: String,
        #[arg(long, default_value_t = tip_connectors::disclosure::DEFAULT_RPS)]
        max_rps: f64,
    },
    /// Run a connector repeatedly on a fixed interval until interrupted.
    RunConnectorLoop {
        #[arg(long, value_enum)]
        source: ConnectorSource,
        #[arg(long, value_enum, default_value = "shadow")]
        mode: CliMode,
        #[arg(long, default_value_t = 60)]
        interval: u64,
        #[arg(long, default_value_t = 0)]
        max_cycles: u32,
    },
    /// Drain unpublished outbox rows onto the queue.
    DispatchOutbox {
        #[arg(long, default_value_t = 100)]
        batch_size: i64,
        #[arg(long, default_value_t = 0)]
        interval: u64,
        #[arg(long, default_value_t = 0)]
        max_cycles: u32,
    },
    /// Republish events from the last N minutes, bypassing the outbox.
    ReplayLastMinutes {
        #[arg(long)]
        minutes: i64,
        #[arg(long, value_enum, default_value = "ts-event")]
        key: ReplayKey,
    },
    /// Zero-pad a company identifier to the 10-digit CIK form.
    LookupCik { cik: String },
    /// Serve `/health` and `/metrics` over HTTP.
    ServeMetrics {
        #[arg(long, default_value_t = 8090)]
        port: u16,
    },
    /// Apply pending SQL migrations in lexical order.
    Migrate {
        #[arg(long, default_value = "crates/tip-adapters/migrations")]
        dir: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum ReplayKey {
    TsEvent,
    TsIngested,
}

impl From<ReplayKey> for TimestampKey {
    fn from(key: ReplayKey) -> Self {
        match key {
            ReplayKey::TsEvent => TimestampKey::TsEvent,
            ReplayKey::TsIngested => TimestampKey::TsIngested,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let exit_code = match run(cli.command).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "command failed");
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::LookupCik { cik } => {
            println!("{}", normalize_cik(&cik));
            Ok(())
        }
        Commands::Migrate { dir } => cmd_migrate(&dir).await,
        Commands::RunWsb { mode } => {
            let (store, blob, alerts) = connect_store_and_blob().await?;
            let connector = MockConnector;
            let stats = run_once(&connector, &blob, &store, &tip_ports::SystemClock, &alerts, mode.into()).await;
            record_canary(&store, "tip-wsb-connector", &stats).await;
            log_stats("tip-wsb-connector", &stats);
            Ok(())
        }
        Commands::RunReddit { mode, subreddits, user_agent } => {
            let (store, blob, alerts) = connect_store_and_blob().await?;
            let connector = ForumConnector::new(ForumConfig { subreddits, user_agent })?;
            let stats = run_once(&connector, &blob, &store, &tip_ports::SystemClock, &alerts, mode.into()).await;
            record_canary(&store, "tip-reddit-connector", &stats).await;
            log_stats("tip-reddit-connector", &stats);
            Ok(())
        }
        Commands::RunEdgar { mode, ciks, user_agent_name, user_agent_email, max_rps } => {
            if ciks.is_empty() {
                return Err("no CIKs configured (TIP_EDGAR_CIKS or --ciks)".into());
            }
            let (store, blob, alerts) = connect_store_and_blob().await?;
            let connector = DisclosureConnector::new(
                DisclosureConfig {
                    ciks,
                    user_agent_name,
                    user_agent_email,
                    max_rps,
                    forms_allowlist: default_forms_allowlist(),
                },
                store.clone(),
            )?;
            let stats = run_once(&connector, &blob, &store, &tip_ports::SystemClock, &alerts, mode.into()).await;
            record_canary(&store, "tip-edgar-connector", &stats).await;
            log_stats("tip-edgar-connector", &stats);
            Ok(())
        }
        Commands::RunConnectorLoop { source, mode, interval, max_cycles } => {
            run_connector_loop(source, mode.into(), interval, max_cycles).await
        }
        Commands::DispatchOutbox { batch_size, interval, max_cycles } => {
            cmd_dispatch_outbox(batch_size, interval, max_cycles).await
        }
        Commands::ReplayLastMinutes { minutes, key } => cmd_replay(minutes, key.into()).await,
        Commands::ServeMetrics { port } => cmd_serve_metrics(port).await,
    }
}

async fn connect_store_and_blob(
) -> Result<(PostgresStore, S3BlobStore, AlertNotifier), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env();
    let store = PostgresStore::connect(&config.postgres.dsn, config.postgres.max_connections).await?;
    let blob = S3BlobStore::new(BlobConfig {
        bucket: config.blob.bucket.clone(),
        region: config.blob.region.clone(),
        endpoint_url: config.blob.endpoint_url.clone(),
        access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_else(|_| "minioadmin".to_string()),
        secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".to_string()),
    })
    .await?;
    let alerts = AlertNotifier::new(config.slack_webhook_url.clone());
    Ok((store, blob, alerts))
}

async fn connect_queue(config: &ServiceConfig) -> Result<NatsMessageQueue, Box<dyn std::error::Error>> {
    let queue = NatsMessageQueue::connect(NatsQueueConfig {
        nats_url: config.queue.nats_url.clone(),
        ..Default::default()
    })
    .await?;
    Ok(queue)
}

async fn record_canary(store: &PostgresStore, service: &str, stats: &RunStats) {
    let stats_json = serde_json::to_value(stats).unwrap_or_else(|_| serde_json::json!({}));
    let status = if stats.errors == 0 { "ok" } else { "degraded" };
    if let Err(e) = tip_ports::EventStore::record_canary_run(store, service, env!("CARGO_PKG_VERSION"), &stats_json, status).await {
        error!(service, error = %e, "failed to record canary run");
    }
}

fn log_stats(connector: &str, stats: &RunStats) {
    info!(
        connector,
        fetched = stats.fetched,
        ingested = stats.ingested,
        deduped = stats.deduped,
        errors = stats.errors,
        "connector cycle complete"
    );
}

async fn run_connector_loop(
    source: ConnectorSource,
    mode: Mode,
    interval: u64,
    max_cycles: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            running.store(false, Ordering::Relaxed);
        });
    }

    let (store, blob, alerts) = connect_store_and_blob().await?;
    let interval = Duration::from_secs(interval);
    let mut cycles = 0u32;

    while running.load(Ordering::Relaxed) {
        let stats = match source {
            ConnectorSource::Wsb => {
                let connector = MockConnector;
                run_once(&connector, &blob, &store, &tip_ports::SystemClock, &alerts, mode).await
            }
            ConnectorSource::Reddit => {
                let connector = ForumConnector::new(ForumConfig {
                    subreddits: std::env::var("TIP_REDDIT_SUBREDDITS")
                        .unwrap_or_else(|_| "wallstreetbets".to_string())
                        .split(',')
                        .map(str::to_string)
                        .collect(),
                    user_agent: std::env::var("TIP_REDDIT_USER_AGENT")
                        .unwrap_or_else(|_| "tip-reddit-connector/0.1".to_string()),
                })?;
                run_once(&connector, &blob, &store, &tip_ports::SystemClock, &alerts, mode).await
            }
            ConnectorSource::Edgar => {
                let ciks: Vec<String> = std::env::var("TIP_EDGAR_CIKS")
                    .unwrap_or_default()
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if ciks.is_empty() {
                    return Err("no CIKs configured (TIP_EDGAR_CIKS)".into());
                }
                let connector = DisclosureConnector::new(
                    DisclosureConfig {
                        ciks,
                        user_agent_name: std::env::var("TIP_EDGAR_USER_AGENT_NAME")
                            .unwrap_or_else(|_| "Trading Intel Platform".to_string()),
                        user_agent_email: std::env::var("TIP_EDGAR_USER_AGENT_EMAIL")
                            .unwrap_or_else(|_| "ops@example.com".to_string()),
                        max_rps: tip_connectors::disclosure::DEFAULT_RPS,
                        forms_allowlist: default_forms_allowlist(),
                    },
                    store.clone(),
                )?;
                run_once(&connector, &blob, &store, &tip_ports::SystemClock, &alerts, mode).await
            }
        };
        log_stats("run-connector-loop", &stats);
        record_canary(&store, "tip-connector-loop", &stats).await;

        cycles += 1;
        if max_cycles != 0 && cycles >= max_cycles {
            break;
        }
        if interval.is_zero() {
            break;
        }
        tokio::time::sleep(interval).await;
    }

    Ok(())
}

async fn cmd_dispatch_outbox(batch_size: i64, interval: u64, max_cycles: u32) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env();
    let store = PostgresStore::connect(&config.postgres.dsn, config.postgres.max_connections).await?;
    let queue = connect_queue(&config).await?;

    let dispatcher = OutboxDispatcher::new(store, queue, OutboxDispatcherConfig { batch_size });
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            running.store(false, Ordering::Relaxed);
        });
    }

    let dispatched = dispatcher
        .run_loop(Duration::from_secs(interval), max_cycles, &running)
        .await?;
    info!(dispatched, "dispatch loop stopped");
    Ok(())
}

async fn cmd_replay(minutes: i64, key: TimestampKey) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env();
    let store = PostgresStore::connect(&config.postgres.dsn, config.postgres.max_connections).await?;
    let queue = connect_queue(&config).await?;

    let end = chrono::Utc::now();
    let start = end - chrono::Duration::minutes(minutes);
    let count = replay(&store, &queue, key, start, end).await?;
    info!(count, "replay complete");
    Ok(())
}

async fn cmd_serve_metrics(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    use axum::{routing::get, Json, Router};

    let metrics = Arc::new(IngestionMetrics::default());
    let health_metrics = metrics.clone();

    let app = Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "ok"})) }))
        .route(
            "/metrics",
            get(move || {
                let metrics = health_metrics.clone();
                async move { Json(serde_json::to_value(metrics.snapshot()).unwrap_or_default()) }
            }),
        );

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "metrics server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn cmd_migrate(dir: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env();
    if config.postgres.dsn.is_empty() {
        return Err("PG_DSN is not configured".into());
    }
    let store = PostgresStore::connect(&config.postgres.dsn, config.postgres.max_connections).await?;

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|ext| ext == "sql").unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_name = entry.file_name().to_string_lossy().to_string();
        let sql = std::fs::read_to_string(entry.path())?;
        info!(file = %file_name, "applying migration");
        tip_ports::EventStore::apply_migration(&store, &file_name, &sql).await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
