use serde::{Deserialize, Serialize};
use ta::Next;
use ta::indicators::{MovingAverageConvergenceDivergence, RelativeStrengthIndex};

const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdTrend {
    Bullish,
    Bearish,
}

/// RSI of the last close, or `None` when there are fewer closes than `period`.
pub fn calculate_rsi(closes: &[f64], period: u32) -> Option<f64> {
    if period == 0 || closes.len() < period as usize {
        return None;
    }
    let mut rsi_indicator = RelativeStrengthIndex::new(period as usize).ok()?;

    let mut last_rsi: Option<f64> = None;
    for &price in closes {
        last_rsi = Some(rsi_indicator.next(price));
    }
    last_rsi
}

/// MACD(12, 26, 9) trend on the last close: bullish while the MACD line is
/// above its signal line.
pub fn macd_trend(closes: &[f64]) -> Option<MacdTrend> {
    if closes.len() < MACD_SLOW {
        return None;
    }
    let mut macd = MovingAverageConvergenceDivergence::new(MACD_FAST, MACD_SLOW, MACD_SIGNAL).ok()?;

    let last = closes.iter().fold(None, |_, &price| Some(macd.next(price)))?;
    if last.macd > last.signal {
        Some(MacdTrend::Bullish)
    } else {
        Some(MacdTrend::Bearish)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub macd: MacdTrend,
}

impl IndicatorSnapshot {
    pub fn from_closes(closes: &[f64], rsi_period: u32) -> Option<Self> {
        Some(Self {
            rsi: calculate_rsi(closes, rsi_period)?,
            macd: macd_trend(closes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_requires_a_full_period() {
        assert_eq!(calculate_rsi(&[1.0, 2.0, 3.0], 14), None);
        assert_eq!(calculate_rsi(&[1.0; 20], 0), None);
    }

    #[test]
    fn rsi_tracks_direction_of_moves() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().cloned().collect();

        let up = calculate_rsi(&rising, 14).unwrap();
        let down = calculate_rsi(&falling, 14).unwrap();
        assert!(up > 70.0, "rsi on a rising series was {up}");
        assert!(down < 30.0, "rsi on a falling series was {down}");
    }

    #[test]
    fn macd_trend_follows_recent_acceleration() {
        let rising: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64).powi(2) * 0.1).collect();
        let falling: Vec<f64> = (0..50).map(|i| 500.0 - (i as f64).powi(2) * 0.1).collect();

        assert_eq!(macd_trend(&rising), Some(MacdTrend::Bullish));
        assert_eq!(macd_trend(&falling), Some(MacdTrend::Bearish));
        assert_eq!(macd_trend(&rising[..10]), None);
    }

    #[test]
    fn snapshot_needs_both_indicators() {
        let closes: Vec<f64> = (0..20).map(|i| 10.0 + i as f64).collect();
        // Enough for RSI(14) but not for MACD's 26-period slow line.
        assert!(IndicatorSnapshot::from_closes(&closes, 14).is_none());

        let closes: Vec<f64> = (0..50).map(|i| 10.0 + i as f64).collect();
        let snapshot = IndicatorSnapshot::from_closes(&closes, 14).unwrap();
        assert_eq!(snapshot.macd, MacdTrend::Bullish);
    }
}
