//! This module contains the core analysis pipeline logic.

use crate::candles::BitvavoClient;
use crate::storage_utils::AsyncStorageManager;
use crate::{entry_check, find_tickers, trade_plans};
use anyhow::Result;
use tracing::info;

/// Runs the full analysis pipeline:
/// 1. Fetches the market list and applies the configured filters.
/// 2. Simulates a directional frequent-level trade for each market.
/// 3. Checks the resulting plans against live prices and indicators.
pub async fn run_analysis_pipeline(storage: &AsyncStorageManager) -> Result<()> {
    let config = storage.load_config().await?;
    let client = BitvavoClient::new(&config.api)?;

    info!("step 1: fetching markets");
    let markets = find_tickers::fetch_markets(&client, storage, &config.filters).await?;

    info!(markets = markets.len(), "step 2: simulating trades");
    trade_plans::run(&client, storage, &markets, &config).await?;

    info!("step 3: checking entry conditions");
    entry_check::run(&client, storage, &config).await?;

    Ok(())
}
