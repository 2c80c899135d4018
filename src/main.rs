mod analysis;
mod candles;
mod comfy_table;
mod entry_check;
mod filter_utils;
mod find_tickers;
mod indicators;
mod levels;
mod prediction_check;
mod simulator;
mod storage_utils;
mod trade_plans;

use anyhow::Result;
use candles::BitvavoClient;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use storage_utils::AsyncStorageManager;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "level-screener")]
#[command(about = "Frequent-level trade screener for Bitvavo markets")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Storage directory for config and reports (defaults to ./storage next to the binary)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch markets, simulate trades, and check entries, then show ready entries
    Analyze,
    /// Fetch and store the filtered market list
    Markets,
    /// Simulate a directional frequent-level trade for every market
    Simulate,
    /// Check stored trade plans against live prices and indicators
    CheckEntry,
    /// Back-check ready entries against the last day of one-minute candles
    CheckPredictions,
    /// Print a stored report
    Show {
        #[arg(value_enum, default_value_t = Report::Entries)]
        report: Report,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Report {
    Plans,
    Entries,
    Predictions,
}

impl From<Report> for comfy_table::View {
    fn from(report: Report) -> Self {
        match report {
            Report::Plans => comfy_table::View::Plans,
            Report::Entries => comfy_table::View::Entries,
            Report::Predictions => comfy_table::View::Predictions,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("level_screener=info")),
        )
        .init();

    let args = Args::parse();

    let storage = match &args.storage {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };

    if let Err(e) = run_command(args.command, &storage).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run_command(command: Commands, storage: &AsyncStorageManager) -> Result<()> {
    match command {
        Commands::Analyze => {
            analysis::run_analysis_pipeline(storage).await?;
            comfy_table::run(storage, comfy_table::View::Entries).await?;
        }
        Commands::Markets => {
            let config = storage.load_config().await?;
            let client = BitvavoClient::new(&config.api)?;
            let markets = find_tickers::fetch_markets(&client, storage, &config.filters).await?;
            info!(count = markets.len(), "markets selected");
        }
        Commands::Simulate => {
            let config = storage.load_config().await?;
            let client = BitvavoClient::new(&config.api)?;
            let markets = find_tickers::fetch_markets(&client, storage, &config.filters).await?;
            trade_plans::run(&client, storage, &markets, &config).await?;
            comfy_table::run(storage, comfy_table::View::Plans).await?;
        }
        Commands::CheckEntry => {
            let config = storage.load_config().await?;
            let client = BitvavoClient::new(&config.api)?;
            entry_check::run(&client, storage, &config).await?;
            comfy_table::run(storage, comfy_table::View::Entries).await?;
        }
        Commands::CheckPredictions => {
            let config = storage.load_config().await?;
            let client = BitvavoClient::new(&config.api)?;
            prediction_check::run(&client, storage, &config).await?;
            comfy_table::run(storage, comfy_table::View::Predictions).await?;
        }
        Commands::Show { report } => {
            comfy_table::run(storage, report.into()).await?;
        }
    }
    Ok(())
}
