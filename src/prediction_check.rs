//! Back-checks ready entries against the last day of one-minute candles.

use crate::candles::{self, Candle, CandleQuery, CandleSource, MAX_CANDLES_PER_REQUEST};
use crate::entry_check::{self, ReadyEntryReport};
use crate::storage_utils::{AppConfig, AsyncStorageManager};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

pub const REPORT_NAME: &str = "prediction_checks";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionOutcome {
    Executed { duration_secs: i64 },
    EntryOnly,
    NotTriggered,
    NoData,
}

impl fmt::Display for PredictionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionOutcome::Executed { .. } => f.write_str("Trade executed successfully"),
            PredictionOutcome::EntryOnly => f.write_str("Entry only"),
            PredictionOutcome::NotTriggered => f.write_str("Not triggered"),
            PredictionOutcome::NoData => f.write_str("No data"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PredictionCheck {
    pub market: String,
    pub entry: f64,
    pub exit: f64,
    pub entry_hit: Option<DateTime<Utc>>,
    pub exit_hit: Option<DateTime<Utc>>,
    pub outcome: PredictionOutcome,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PredictionReport {
    pub last_updated_timestamp: i64,
    pub window_start: i64,
    pub checks: Vec<PredictionCheck>,
}

/// Walks `candles` looking for the first low at or below `entry`, then for a
/// later high at or above `exit`. The candle that fills the entry cannot also
/// fill the exit.
pub fn evaluate(candles: &[Candle], entry: f64, exit: f64) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut entry_hit = None;
    for candle in candles {
        if entry_hit.is_none() {
            if candle.low <= entry {
                entry_hit = Some(candle.timestamp);
            }
        } else if candle.high >= exit {
            return (entry_hit, Some(candle.timestamp));
        }
    }
    (entry_hit, None)
}

pub fn outcome_of(entry_hit: Option<DateTime<Utc>>, exit_hit: Option<DateTime<Utc>>) -> PredictionOutcome {
    match (entry_hit, exit_hit) {
        (Some(entered), Some(exited)) => PredictionOutcome::Executed {
            duration_secs: (exited - entered).num_seconds(),
        },
        (Some(_), None) => PredictionOutcome::EntryOnly,
        _ => PredictionOutcome::NotTriggered,
    }
}

pub async fn check_predictions<S: CandleSource>(
    source: &S,
    ready: &ReadyEntryReport,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<PredictionReport> {
    let window = config
        .prediction
        .window()
        .context("prediction.window_hours must be a positive number of hours")?;
    let start = now
        .checked_sub_signed(window)
        .context("prediction window reaches before the supported date range")?;
    let query = CandleQuery::between(config.prediction.interval.clone(), MAX_CANDLES_PER_REQUEST, start, now);
    let query = &query;
    let per_batch = candles::batch_size(config.api.weight_limit_per_minute, 1);

    let checks = candles::in_batches(&ready.entries, per_batch, |ready_entry| {
        let (market, entry, exit) = (ready_entry.plan.market.clone(), ready_entry.plan.entry, ready_entry.plan.exit);
        async move {
            let (entry_hit, exit_hit, outcome) = match source.candles(&market, query).await {
                Ok(candles) if !candles.is_empty() => {
                    let (entry_hit, exit_hit) = evaluate(&candles, entry, exit);
                    (entry_hit, exit_hit, outcome_of(entry_hit, exit_hit))
                }
                Ok(_) => (None, None, PredictionOutcome::NoData),
                Err(e) => {
                    warn!(market = %market, error = %e, "could not fetch verification candles");
                    (None, None, PredictionOutcome::NoData)
                }
            };
            PredictionCheck {
                market,
                entry,
                exit,
                entry_hit,
                exit_hit,
                outcome,
            }
        }
    })
    .await;

    Ok(PredictionReport {
        last_updated_timestamp: now.timestamp_millis(),
        window_start: start.timestamp_millis(),
        checks,
    })
}

pub async fn run<S: CandleSource>(
    source: &S,
    storage: &AsyncStorageManager,
    config: &AppConfig,
) -> Result<PredictionReport> {
    if !storage.exists(entry_check::REPORT_NAME) {
        warn!("no ready entries stored yet, run the entry check first");
        return Ok(PredictionReport::default());
    }
    let ready: ReadyEntryReport = storage.load(entry_check::REPORT_NAME).await?;

    let report = check_predictions(source, &ready, config, Utc::now()).await?;

    storage.save(REPORT_NAME, &report).await?;
    info!(checked = report.checks.len(), "prediction checks saved");
    Ok(report)
}
