use std::fs;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use contend_kernel::config::ScenarioConfig;
use contend_kernel::scenario::{run_scenario, ScenarioReport};
use contend_kernel::store::{InMemoryStore, KvStore};

/// Storage backend to run the scenario against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process sorted store
    Memory,
    /// DynamoDB Local on `--port` (requires the `dynamodb` feature)
    Dynamodb,
}

/// Concurrent bulk-update and checked-delete run against a key-value table
#[derive(Parser, Debug)]
#[command(name = "contend")]
#[command(about = "Probe a key-value store for concurrent-write anomalies", long_about = None)]
struct Cli {
    /// Path to scenario config JSON
    #[arg(long)]
    config: Option<String>,

    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// Port of the local DynamoDB endpoint
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Route conditional puts through TransactWriteItems
    #[arg(long)]
    transactional_puts: bool,

    /// Seed for writer identities, payloads and shuffles
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("contend=info,contend_kernel=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Any failure is fatal for the whole run.
    if let Err(err) = run(Cli::parse()).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // ----------------------------
    // Load scenario config
    // ----------------------------
    let mut config = if let Some(path) = &cli.config {
        let data = fs::read_to_string(path)?;
        serde_json::from_str::<ScenarioConfig>(&data)?
    } else {
        ScenarioConfig::default_config()
    };
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }

    // ----------------------------
    // Connect store
    // ----------------------------
    let store = connect(&cli).await?;

    // ----------------------------
    // Run scenario
    // ----------------------------
    info!(
        table = %config.table,
        items = config.item_count,
        workers = config.worker_count,
        backend = ?cli.backend,
        "starting"
    );
    let report: ScenarioReport = run_scenario(store, &config).await?;

    // ----------------------------
    // Output
    // ----------------------------
    println!("{}", serde_json::to_string_pretty(&report)?);
    info!("completed");

    Ok(())
}

async fn connect(cli: &Cli) -> Result<Arc<dyn KvStore>> {
    match cli.backend {
        Backend::Memory => {
            if cli.transactional_puts {
                bail!("--transactional-puts only applies to the dynamodb backend");
            }
            Ok(Arc::new(InMemoryStore::new()))
        }
        Backend::Dynamodb => dynamodb(cli).await,
    }
}

#[cfg(feature = "dynamodb")]
async fn dynamodb(cli: &Cli) -> Result<Arc<dyn KvStore>> {
    use contend_kernel::store::dynamodb::DynamoDbStore;

    info!(port = cli.port, "creating DynamoDB client for DynamoDB Local");
    Ok(Arc::new(
        DynamoDbStore::local(cli.port, cli.transactional_puts).await,
    ))
}

#[cfg(not(feature = "dynamodb"))]
async fn dynamodb(cli: &Cli) -> Result<Arc<dyn KvStore>> {
    bail!(
        "cannot reach DynamoDB on port {}: this build has no DynamoDB support; rebuild with `--features dynamodb`",
        cli.port
    )
}
