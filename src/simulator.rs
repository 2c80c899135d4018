//! Level-direction trade simulation over one candle series.
//!
//! A single forward pass: enter when price sits at or below the low frequent
//! level while the short-term direction is up, then exit on a later candle at
//! or above the high level while the direction is down. The first qualifying
//! entry is final; earlier or better entries are never revisited.

use crate::candles::Candle;
use crate::levels::FrequentLevels;
use crate::storage_utils::SimulationConfig;
use chrono::{DateTime, TimeDelta, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Undefined,
}

/// Compares `closes[i]` with the mean of the `period` closes before it.
/// Equality counts as `Down`.
pub fn direction(closes: &[f64], i: usize, period: usize) -> Direction {
    if period == 0 || i < period || i >= closes.len() {
        return Direction::Undefined;
    }
    let mean = closes[i - period..i].iter().sum::<f64>() / period as f64;
    if closes[i] > mean {
        Direction::Up
    } else {
        Direction::Down
    }
}

pub fn volatility_pct(entry_price: f64, exit_price: f64) -> f64 {
    (exit_price - entry_price) / entry_price * 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTrade {
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub volatility_pct: f64,
    pub duration: TimeDelta,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimulationOutcome {
    InsufficientData { len: usize, required: usize },
    /// Series exhausted before an entry, or before the exit of an entry.
    NoTrade { levels: FrequentLevels },
    Trade {
        levels: FrequentLevels,
        trade: SimulatedTrade,
    },
}

enum ScanState {
    SearchingEntry,
    SearchingExit { entry: usize },
    Done { entry: usize, exit: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct Simulator {
    config: SimulationConfig,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, candles: &[Candle]) -> SimulationOutcome {
        // The scan needs at least one candle past the lookback window.
        let required = self.config.min_candles.max(self.config.lookback + 1);
        if candles.len() < required {
            return SimulationOutcome::InsufficientData {
                len: candles.len(),
                required,
            };
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let Some(levels) = FrequentLevels::from_closes(&closes, self.config.bins) else {
            return SimulationOutcome::InsufficientData { len: 0, required };
        };

        let period = self.config.lookback;
        let mut state = ScanState::SearchingEntry;

        for (i, &price) in closes.iter().enumerate().skip(period) {
            state = match state {
                ScanState::SearchingEntry
                    if price <= levels.low && direction(&closes, i, period) == Direction::Up =>
                {
                    ScanState::SearchingExit { entry: i }
                }
                ScanState::SearchingExit { entry }
                    if price >= levels.high && direction(&closes, i, period) == Direction::Down =>
                {
                    ScanState::Done { entry, exit: i }
                }
                other => other,
            };
            if matches!(state, ScanState::Done { .. }) {
                break;
            }
        }

        match state {
            ScanState::Done { entry, exit } => {
                let (entry_candle, exit_candle) = (&candles[entry], &candles[exit]);
                SimulationOutcome::Trade {
                    levels,
                    trade: SimulatedTrade {
                        entry_index: entry,
                        exit_index: exit,
                        entry_price: entry_candle.close,
                        exit_price: exit_candle.close,
                        entry_time: entry_candle.timestamp,
                        exit_time: exit_candle.timestamp,
                        volatility_pct: volatility_pct(entry_candle.close, exit_candle.close),
                        duration: exit_candle.timestamp - entry_candle.timestamp,
                    },
                }
            }
            _ => SimulationOutcome::NoTrade { levels },
        }
    }
}
