//! pawctl - inspect and maintain the VentasPet client cache

mod config;
mod handler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pawcache::{spawn_maintenance, CacheStore, Expiry, FileStorage, MaintenanceConfig, Namespace};
use pawfetch::{HttpTransport, RequestOptimizer, RequestOptions};
use tracing::info;

use crate::config::PawConfig;
use crate::handler::CommandHandler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show cache statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read a live value
    Get { namespace: Namespace, key: String },

    /// Store a value (JSON, or plain text stored as a string)
    Set {
        namespace: Namespace,
        key: String,
        value: String,

        /// Lifetime in minutes; the configured default when omitted
        #[arg(long)]
        ttl_minutes: Option<u64>,

        /// Never expire
        #[arg(long, conflicts_with = "ttl_minutes")]
        never: bool,
    },

    /// Remove a value
    Remove { namespace: Namespace, key: String },

    /// Purge expired and corrupted entries
    Sweep,

    /// Evict oldest entries until BYTES fit in the budget
    Evict { bytes: u64 },

    /// Dump every cache record as JSON
    Export,

    /// Remove every cache record
    Clear,

    /// Run periodic maintenance until Ctrl+C
    Watch,

    /// GET a URL through the request optimizer and its cache
    Fetch {
        url: String,

        /// Retries for retryable failures; the configured count when omitted
        #[arg(long)]
        retries: Option<u32>,

        /// Override the configured base URL
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = PawConfig::load(args.config.as_deref())?;

    let storage = FileStorage::open_with_quota(&args.data, config.storage.quota_bytes())
        .with_context(|| format!("failed to open cache at {}", args.data.display()))?;
    let store = Arc::new(CacheStore::new(Arc::new(storage), config.cache.clone())?);
    let handler = CommandHandler::new(store.clone());

    let output = match args.command {
        Command::Stats { json } => handler.stats(json)?,
        Command::Get { namespace, key } => handler.get(namespace, &key)?,
        Command::Set {
            namespace,
            key,
            value,
            ttl_minutes,
            never,
        } => {
            let expiry = match (never, ttl_minutes) {
                (true, _) => Expiry::Never,
                (false, Some(minutes)) => Expiry::minutes(minutes),
                (false, None) => Expiry::Default,
            };
            handler.set(namespace, &key, &value, expiry)?
        }
        Command::Remove { namespace, key } => handler.remove(namespace, &key)?,
        Command::Sweep => handler.sweep(),
        Command::Evict { bytes } => handler.evict(bytes),
        Command::Export => handler.export()?,
        Command::Clear => handler.clear(),
        Command::Watch => {
            watch(store, &config.maintenance).await?;
            return Ok(());
        }
        Command::Fetch {
            url,
            retries,
            base_url,
        } => {
            if let Some(base_url) = base_url {
                config.optimizer.base_url = base_url;
            }
            fetch(store, &config, &url, retries).await?
        }
    };

    println!("{}", output);
    Ok(())
}

async fn watch(store: Arc<CacheStore>, maintenance: &MaintenanceConfig) -> Result<()> {
    info!("Starting pawctl v{} maintenance", env!("CARGO_PKG_VERSION"));
    let handle = spawn_maintenance(store, maintenance);

    println!("\n🛑 Press Ctrl+C to stop\n");
    tokio::signal::ctrl_c().await?;

    let report = handle.shutdown().await;
    info!(
        "Maintenance stopped; final sweep removed {} entries",
        report.count
    );
    Ok(())
}

async fn fetch(
    store: Arc<CacheStore>,
    config: &PawConfig,
    url: &str,
    retries: Option<u32>,
) -> Result<String> {
    let transport = HttpTransport::from_config(&config.optimizer)?;
    let optimizer = RequestOptimizer::new(config.optimizer.clone(), store, Arc::new(transport))?;

    let value = optimizer
        .request_with_retry(url, RequestOptions::get(), retries)
        .await
        .with_context(|| format!("request to {} failed", url))?;

    optimizer.log_metrics();
    Ok(serde_json::to_string_pretty(&value)?)
}
