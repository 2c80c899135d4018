//! Directional frequent-level screen across all selected markets.

use crate::candles::{self, Candle, CandleQuery, CandleSource, SourceError};
use crate::levels::{round_to, round4};
use crate::simulator::{SimulatedTrade, SimulationOutcome, Simulator};
use crate::storage_utils::{AppConfig, AsyncStorageManager};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

pub const TRIGGER_LABEL: &str = "Frequent Levels with Direction";
pub const REPORT_NAME: &str = "trade_plans";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub date: NaiveDate,
    pub market: String,
    pub average_price: f64,
    pub quantity: f64,
    pub invested_money: f64,
    pub entry: f64,
    pub exit: f64,
    pub volatility_pct: f64,
    pub trigger: String,
    pub profit_target: f64,
    pub expected_duration_secs: i64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientData,
    NoDirectionalTrade,
    Source(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InsufficientData => f.write_str("insufficient data"),
            SkipReason::NoDirectionalTrade => f.write_str("no clear directional entry/exit"),
            SkipReason::Source(msg) => write!(f, "exception: {}", msg),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SkippedMarket {
    pub market: String,
    pub reason: SkipReason,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TradePlanReport {
    pub last_updated_timestamp: i64,
    pub plans: Vec<TradePlan>,
    pub skipped: Vec<SkippedMarket>,
}

/// Sizes a simulated trade into a plan for `invested_money`.
pub fn build_plan(market: &str, trade: &SimulatedTrade, invested_money: f64, date: NaiveDate) -> TradePlan {
    let average_price = (trade.entry_price + trade.exit_price) / 2.0;
    let quantity = round4(invested_money / average_price);
    let profit_target = round_to(quantity * (trade.exit_price - trade.entry_price), 2);

    TradePlan {
        date,
        market: market.to_string(),
        average_price: round4(average_price),
        quantity,
        invested_money,
        entry: round4(trade.entry_price),
        exit: round4(trade.exit_price),
        volatility_pct: round_to(trade.volatility_pct, 2),
        trigger: TRIGGER_LABEL.to_string(),
        profit_target,
        expected_duration_secs: trade.duration.num_seconds(),
        entry_time: trade.entry_time,
        exit_time: trade.exit_time,
    }
}

fn evaluate_market(
    market: &str,
    fetched: Result<Vec<Candle>, SourceError>,
    simulator: &Simulator,
    invested_money: f64,
    date: NaiveDate,
) -> Result<TradePlan, SkippedMarket> {
    let skip = |reason| SkippedMarket {
        market: market.to_string(),
        reason,
    };

    let candles = fetched.map_err(|e| skip(SkipReason::Source(e.to_string())))?;

    match simulator.run(&candles) {
        SimulationOutcome::Trade { levels, trade } => {
            debug!(
                market,
                low = levels.low,
                high = levels.high,
                entry_index = trade.entry_index,
                exit_index = trade.exit_index,
                "simulated trade"
            );
            Ok(build_plan(market, &trade, invested_money, date))
        }
        SimulationOutcome::NoTrade { .. } => Err(skip(SkipReason::NoDirectionalTrade)),
        SimulationOutcome::InsufficientData { .. } => Err(skip(SkipReason::InsufficientData)),
    }
}

/// Fetches candles for every market and simulates each series independently.
/// Plans come back sorted by volatility, highest first.
pub async fn simulate_markets<S: CandleSource>(
    source: &S,
    markets: &[String],
    config: &AppConfig,
    now: DateTime<Utc>,
) -> TradePlanReport {
    let query = CandleQuery::latest(config.candles.interval.clone(), config.candles.limit);
    let query = &query;
    let simulator = Simulator::new(config.simulation);
    let per_batch = candles::batch_size(config.api.weight_limit_per_minute, 1);

    let fetched = candles::in_batches(markets, per_batch, |market| {
        let market = market.clone();
        async move {
            let result = source.candles(&market, query).await;
            (market, result)
        }
    })
    .await;

    let date = now.date_naive();
    let mut report = TradePlanReport {
        last_updated_timestamp: now.timestamp_millis(),
        ..Default::default()
    };
    for (market, result) in fetched {
        match evaluate_market(&market, result, &simulator, config.entry.invested_money, date) {
            Ok(plan) => report.plans.push(plan),
            Err(skipped) => report.skipped.push(skipped),
        }
    }

    report.plans.sort_by(|a, b| {
        b.volatility_pct
            .partial_cmp(&a.volatility_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    report
}

pub async fn run<S: CandleSource>(
    source: &S,
    storage: &AsyncStorageManager,
    markets: &[String],
    config: &AppConfig,
) -> Result<TradePlanReport> {
    let report = simulate_markets(source, markets, config, Utc::now()).await;

    storage.save(REPORT_NAME, &report).await?;

    info!(
        planned = report.plans.len(),
        skipped = report.skipped.len(),
        "trade plans saved"
    );
    Ok(report)
}
