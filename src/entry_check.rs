//! Re-checks stored trade plans against live prices.
//!
//! A plan is ready when the current price is within the configured tolerance
//! above its planned entry. Ready plans carry RSI and MACD trend from a fast
//! and a slow candle interval for context.

use crate::candles::{self, CandleQuery, CandleSource, PriceSource};
use crate::indicators::IndicatorSnapshot;
use crate::levels::round_to;
use crate::storage_utils::{AppConfig, AsyncStorageManager, EntryConfig};
use crate::trade_plans::{self, TradePlan, TradePlanReport};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

pub const REPORT_NAME: &str = "ready_entries";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Profitable,
    AtLoss,
    BreakEven,
}

impl PositionStatus {
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            PositionStatus::Profitable
        } else if pnl < 0.0 {
            PositionStatus::AtLoss
        } else {
            PositionStatus::BreakEven
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PositionStatus::Profitable => "Profitable",
            PositionStatus::AtLoss => "At loss",
            PositionStatus::BreakEven => "Break-even",
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReadyEntry {
    #[serde(flatten)]
    pub plan: TradePlan,
    pub current_price: f64,
    pub fast: IndicatorSnapshot,
    pub slow: IndicatorSnapshot,
    pub unrealized_pnl: f64,
    pub status: PositionStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ReadyEntryReport {
    pub last_updated_timestamp: i64,
    pub entries: Vec<ReadyEntry>,
}

/// Builds the ready entry for `plan` if `current_price` is close enough to its entry.
pub fn qualify(
    plan: &TradePlan,
    current_price: f64,
    fast: IndicatorSnapshot,
    slow: IndicatorSnapshot,
    tolerance_pct: f64,
) -> Option<ReadyEntry> {
    if current_price > plan.entry * (1.0 + tolerance_pct / 100.0) {
        return None;
    }

    let mut plan = plan.clone();
    plan.profit_target = round_to((plan.exit - plan.entry) * plan.quantity, 2);
    let unrealized_pnl = round_to((current_price - plan.entry) * plan.quantity, 2);

    Some(ReadyEntry {
        plan,
        current_price: round_to(current_price, 8),
        fast,
        slow,
        unrealized_pnl,
        status: PositionStatus::from_pnl(unrealized_pnl),
    })
}

async fn snapshot<S: CandleSource>(
    source: &S,
    market: &str,
    interval: &str,
    config: &EntryConfig,
) -> Result<IndicatorSnapshot> {
    let query = CandleQuery::latest(interval, config.indicator_limit);
    let candles = source.candles(market, &query).await?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    IndicatorSnapshot::from_closes(&closes, config.rsi_period)
        .with_context(|| format!("not enough {} candles for indicators ({})", interval, closes.len()))
}

async fn check_plan<S: CandleSource + PriceSource>(
    source: &S,
    plan: &TradePlan,
    config: &EntryConfig,
) -> Option<ReadyEntry> {
    let market = plan.market.as_str();

    let current_price = match source.last_price(market).await {
        Ok(price) => price,
        Err(e) => {
            warn!(market, error = %e, "could not fetch current price");
            return None;
        }
    };

    let indicators = futures::try_join!(
        snapshot(source, market, &config.fast_interval, config),
        snapshot(source, market, &config.slow_interval, config),
    );
    let (fast, slow) = match indicators {
        Ok(pair) => pair,
        Err(e) => {
            warn!(market, error = %e, "indicator computation failed");
            return None;
        }
    };

    qualify(plan, current_price, fast, slow, config.tolerance_pct)
}

pub async fn check_entries<S: CandleSource + PriceSource>(
    source: &S,
    plans: &[TradePlan],
    config: &AppConfig,
) -> Vec<ReadyEntry> {
    // One price request plus one candle request per interval.
    let per_batch = candles::batch_size(config.api.weight_limit_per_minute, 3);
    let entry_config = &config.entry;

    candles::in_batches(plans, per_batch, |plan| {
        let plan = plan.clone();
        async move { check_plan(source, &plan, entry_config).await }
    })
    .await
    .into_iter()
    .flatten()
    .collect()
}

pub async fn run<S: CandleSource + PriceSource>(
    source: &S,
    storage: &AsyncStorageManager,
    config: &AppConfig,
) -> Result<ReadyEntryReport> {
    if !storage.exists(trade_plans::REPORT_NAME) {
        warn!("no trade plans stored yet, run the simulation first");
        return Ok(ReadyEntryReport::default());
    }
    let plans: TradePlanReport = storage.load(trade_plans::REPORT_NAME).await?;

    let report = ReadyEntryReport {
        last_updated_timestamp: Utc::now().timestamp_millis(),
        entries: check_entries(source, &plans.plans, config).await,
    };

    if report.entries.is_empty() {
        info!("no market meets its entry conditions right now");
    } else {
        info!(ready = report.entries.len(), "ready entries saved");
    }
    storage.save(REPORT_NAME, &report).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::testing::{StaticSource, series_from_closes, t0};
    use crate::indicators::MacdTrend;

    fn plan(market: &str, entry: f64, exit: f64, quantity: f64) -> TradePlan {
        TradePlan {
            date: t0().date_naive(),
            market: market.to_string(),
            average_price: (entry + exit) / 2.0,
            quantity,
            invested_money: 500.0,
            entry,
            exit,
            volatility_pct: 0.0,
            trigger: trade_plans::TRIGGER_LABEL.to_string(),
            profit_target: 0.0,
            expected_duration_secs: 600,
            entry_time: t0(),
            exit_time: t0(),
        }
    }

    fn snap() -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi: 50.0,
            macd: MacdTrend::Bullish,
        }
    }

    #[test]
    fn status_from_pnl_sign() {
        assert_eq!(PositionStatus::from_pnl(0.01), PositionStatus::Profitable);
        assert_eq!(PositionStatus::from_pnl(-3.0), PositionStatus::AtLoss);
        assert_eq!(PositionStatus::from_pnl(0.0), PositionStatus::BreakEven);
        assert_eq!(PositionStatus::AtLoss.to_string(), "At loss");
    }

    #[test]
    fn price_within_tolerance_qualifies() {
        let p = plan("BTC-EUR", 100.0, 110.0, 4.0);

        let ready = qualify(&p, 100.4, snap(), snap(), 0.5).unwrap();
        assert_eq!(ready.unrealized_pnl, 1.6);
        assert_eq!(ready.status, PositionStatus::Profitable);
        assert_eq!(ready.plan.profit_target, 40.0);

        let ready = qualify(&p, 98.0, snap(), snap(), 0.5).unwrap();
        assert_eq!(ready.unrealized_pnl, -8.0);
        assert_eq!(ready.status, PositionStatus::AtLoss);

        assert!(qualify(&p, 100.6, snap(), snap(), 0.5).is_none());
    }

    #[tokio::test]
    async fn checks_each_plan_against_live_data() {
        let rising: Vec<f64> = (0..50).map(|i| 90.0 + i as f64 * 0.2).collect();
        let source = StaticSource::default()
            .with_price("BTC-EUR", 99.9)
            .with_candles("BTC-EUR", "15m", series_from_closes(&rising, 15))
            .with_candles("BTC-EUR", "4h", series_from_closes(&rising, 240))
            .with_price("ETH-EUR", 150.0)
            .with_candles("ETH-EUR", "15m", series_from_closes(&rising, 15))
            .with_candles("ETH-EUR", "4h", series_from_closes(&rising, 240))
            // No candles: indicator failure is skipped, not fatal.
            .with_price("SOL-EUR", 10.0);
        let plans = vec![
            plan("BTC-EUR", 100.0, 105.0, 5.0),
            plan("ETH-EUR", 100.0, 105.0, 5.0),
            plan("SOL-EUR", 10.0, 12.0, 50.0),
            plan("XRP-EUR", 1.0, 2.0, 500.0),
        ];

        let ready = check_entries(&source, &plans, &AppConfig::default()).await;

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].plan.market, "BTC-EUR");
        assert_eq!(ready[0].current_price, 99.9);
        assert_eq!(ready[0].fast.macd, MacdTrend::Bullish);
        assert_eq!(ready[0].status, PositionStatus::AtLoss);
    }

    #[tokio::test]
    async fn run_without_plans_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();

        let report = run(&StaticSource::default(), &storage, &AppConfig::default())
            .await
            .unwrap();

        assert!(report.entries.is_empty());
        assert!(!storage.exists(REPORT_NAME));
    }
}
