use anyhow::{Context, Result};
use clap::Parser;
use hook_relay::{Engine, EngineSettings, FileRegistryProvider, RegistryProvider, SqliteEventStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite queue database file.
    pub queue_db: PathBuf,

    /// Path to the TOML file describing event and scheduled triggers.
    pub triggers_file: PathBuf,

    /// Global cap on in-flight webhook requests.
    /// Falls back to EVENTS_HTTP_POOL_SIZE, then 100.
    #[clap(long)]
    pub http_pool_size: Option<usize>,

    /// Event fetch interval in milliseconds when the queue is idle.
    /// Falls back to EVENTS_FETCH_INTERVAL_MS, then 1000.
    #[clap(long)]
    pub fetch_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let settings = EngineSettings::resolve(cli_args.http_pool_size, cli_args.fetch_interval_ms)?;

    info!("Opening queue database at {:?}...", cli_args.queue_db);
    let store = Arc::new(SqliteEventStore::new(&cli_args.queue_db)?);

    let registry = Arc::new(FileRegistryProvider::new(&cli_args.triggers_file));
    let snapshot = registry
        .snapshot()
        .context("Failed to load the triggers file")?;
    info!(
        "Loaded {} event trigger(s) and {} scheduled trigger(s) from {:?}",
        snapshot.event_trigger_count(),
        snapshot.scheduled_trigger_count(),
        cli_args.triggers_file
    );

    let engine = Engine::new(store, registry, settings)?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            shutdown.cancel();
        });
    }

    info!("Delivery engine running");
    engine.run(shutdown).await
}
