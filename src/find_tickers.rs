use crate::candles::BitvavoClient;
use crate::filter_utils::filtered_market_ids;
use crate::storage_utils::AsyncStorageManager;
use anyhow::Context;
use std::collections::HashMap;
use tracing::info;

/// Fetches `/markets`, stores the raw payload as `markets.json`, and returns the
/// identifiers of the markets that pass `filters`.
pub async fn fetch_markets(
    client: &BitvavoClient,
    storage: &AsyncStorageManager,
    filters: &HashMap<String, String>,
) -> anyhow::Result<Vec<String>> {
    let markets = client.markets().await.context("fetching market list")?;

    storage.save("markets", &markets).await?;

    let ids = filtered_market_ids(&markets, filters);
    info!(
        total = markets.len(),
        selected = ids.len(),
        "market list saved to {:?}",
        storage.base_dir
    );
    Ok(ids)
}
