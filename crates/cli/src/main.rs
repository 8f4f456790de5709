//! Vault history pipeline.
//!
//! Fetches vault ids, histories and checkpoint snapshots from a subgraph,
//! reconstructs per-vault ledgers and labels liquidations between
//! checkpoint pairs. Every step reads and writes the JSON data directory.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vault_core::Config;
use vault_ingestion::{DataStore, SubgraphClient};

#[derive(Parser)]
#[command(name = "vault-pipeline", about = "Vault history reconstruction and liquidation labeling")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, env = "VAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every vault id
    Ids,
    /// Count vaults holding collateral and debt per collateral type
    Active,
    /// Fetch histories for the stored vault ids, plus oracle price updates
    History {
        /// Only fetch the first N vaults
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Reconstruct ledgers from stored histories
    Ledgers,
    /// Capture snapshots at every configured checkpoint
    Snapshots {
        /// Skip checkpoints already on disk
        #[arg(short, long)]
        resume: bool,
    },
    /// Label checkpoint pairs into result batches
    Label {
        /// Collateral type to label
        #[arg(short = 't', long)]
        collateral_type: Option<String>,

        /// Records per output file
        #[arg(short, long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vault_ingestion=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if let Command::Label {
        collateral_type,
        batch_size,
    } = &cli.command
    {
        if let Some(ct) = collateral_type {
            config.labeler.collateral_type = ct.clone();
        }
        if let Some(size) = batch_size {
            config.labeler.batch_size = *size;
        }
    }
    config.log_config();

    let store = DataStore::new(&config.storage.data_dir);

    match cli.command {
        Command::Ids => {
            let Some(source) = remote(&config)? else { return Ok(()) };
            let count = commands::fetch_ids(&source, &store).await?;
            info!(count, "Saved vault ids");
        }
        Command::Active => {
            let Some(source) = remote(&config)? else { return Ok(()) };
            let counts = commands::count_active(&source, &config.source.collateral_types).await?;
            info!(total = counts.values().sum::<usize>(), "Counted active vaults");
        }
        Command::History { limit } => {
            let Some(source) = remote(&config)? else { return Ok(()) };
            commands::fetch_histories(&source, &store, &config.source.collateral_types, limit)
                .await
                .context("history fetch failed")?;
        }
        Command::Ledgers => {
            commands::build_ledgers(&store, &config.ledger)
                .context("ledger reconstruction failed")?;
        }
        Command::Snapshots { resume } => {
            let Some(source) = remote(&config)? else { return Ok(()) };
            let checkpoints = config.checkpoints.checkpoints()?;
            let captured = commands::fetch_snapshots(
                &source,
                &store,
                &checkpoints,
                &config.source.collateral_types,
                resume,
            )
            .await?;
            info!(captured, planned = checkpoints.len(), "Snapshots complete");
        }
        Command::Label { .. } => {
            let summary = commands::label(&store, &config.labeler).context("labeling failed")?;
            info!(
                liquidated_frac = summary.liquidated_frac(),
                missing_second = summary.missing_second,
                "Labels written"
            );
        }
    }

    Ok(())
}

/// Subgraph client, or `None` when no endpoint is configured.
fn remote(config: &Config) -> Result<Option<SubgraphClient>> {
    if config.source.endpoint.is_none() {
        warn!("No subgraph endpoint configured (set API_ENDPOINT); nothing to fetch");
        return Ok(None);
    }
    let client = SubgraphClient::from_config(config)?;
    info!(endpoint = client.endpoint(), "Using subgraph");
    Ok(Some(client))
}
