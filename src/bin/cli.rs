//! CLI for talking to a keeldb node

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use keeldb::{Client, NodeConfig, Query, Record, Schema};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "keeldb")]
#[command(about = "keeldb record store CLI")]
#[command(version)]
struct Cli {
    /// Node address
    #[arg(long, default_value = "127.0.0.1:7400")]
    addr: String,

    /// Node configuration file, used for the record schemas
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reply deadline in milliseconds
    #[arg(long, default_value = "10000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Round-trip a test message
    Ping {
        #[arg(default_value = "ping")]
        echo: String,
    },

    /// Print every live record of a type
    GetAll {
        /// Record type
        entity: String,
    },

    /// Run a query given as JSON
    Query {
        /// Record type
        entity: String,

        /// e.g. '{"filters": {"mode": "and", "terms": [...]}, "limit": 10}'
        query: String,
    },

    /// Insert a record given as a JSON object keyed by field name
    Insert {
        /// Record type
        entity: String,

        record: String,
    },

    /// Replace a record given as a JSON object (must include "id")
    Update {
        /// Record type
        entity: String,

        record: String,
    },

    /// Delete a record by id
    Delete {
        /// Record type
        entity: String,

        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut client = Client::connect(cli.addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", cli.addr))?
        .with_timeout(Duration::from_millis(cli.timeout_ms));

    match &cli.command {
        Commands::Ping { echo } => {
            let reply = client.ping(echo).await?;
            println!("{}", reply);
        }

        Commands::GetAll { entity } => {
            let schema = load_schema(&cli, entity)?;
            let records = client.get_all(&schema).await?;
            print_records(&records)?;
        }

        Commands::Query { entity, query } => {
            let schema = load_schema(&cli, entity)?;
            let query: Query = serde_json::from_str(query).context("invalid query JSON")?;
            let records = client.query(&schema, query).await?;
            print_records(&records)?;
        }

        Commands::Insert { entity, record } => {
            let schema = load_schema(&cli, entity)?;
            let record = parse_record(&schema, record)?;
            client.insert(&record).await?;
            println!("{}", record.id());
        }

        Commands::Update { entity, record } => {
            let schema = load_schema(&cli, entity)?;
            let json: serde_json::Value = serde_json::from_str(record).context("invalid record JSON")?;
            if json.get("id").is_none() {
                return Err(anyhow!("update needs the record \"id\""));
            }
            let record = schema.record_from_json(&json)?;
            client.update(&record).await?;
            println!("{}", record.id());
        }

        Commands::Delete { entity, id } => {
            let schema = load_schema(&cli, entity)?;
            client.delete(&schema.blank_with_id(*id)).await?;
            println!("deleted {}", id);
        }
    }

    Ok(())
}

fn load_schema(cli: &Cli, entity: &str) -> Result<Arc<Schema>> {
    let path = cli
        .config
        .as_ref()
        .ok_or_else(|| anyhow!("--config is required to resolve record schemas"))?;
    let config = NodeConfig::load(path)?;
    let entity_config = config
        .entities
        .iter()
        .find(|e| e.name == entity)
        .ok_or_else(|| anyhow!("entity {} is not in {}", entity, path.display()))?;
    Ok(Arc::new(entity_config.to_schema()?))
}

fn parse_record(schema: &Arc<Schema>, json: &str) -> Result<Record> {
    let value: serde_json::Value = serde_json::from_str(json).context("invalid record JSON")?;
    Ok(schema.record_from_json(&value)?)
}

fn print_records(records: &[Record]) -> Result<()> {
    let json: Vec<serde_json::Value> = records.iter().map(Record::to_json).collect();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
