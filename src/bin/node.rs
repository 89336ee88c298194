use anyhow::{Context, Result};
use clap::Parser;
use keeldb::{Node, NodeConfig};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "keeldb-node")]
#[command(about = "keeldb node - serves record types over the keeldb wire protocol")]
#[command(version)]
struct Args {
    /// Node configuration file (JSON or TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting keeldb node {} v{}", config.host.name, keeldb::VERSION);
    tracing::info!("Data directory: {}", config.path.data.display());
    tracing::info!("Entities: {}", config.entities.len());
    tracing::info!("Peers: {:?}", config.peers);

    let node = Node::open(config, Vec::new())?;
    node.serve().await?;

    tracing::info!("Metrics at shutdown:\n{}", node.metrics().to_prometheus());
    Ok(())
}
