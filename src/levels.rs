//! Frequent price levels from a histogram of closing prices.
//!
//! The close range `[min, max]` is cut into equal-width bins (the last bin is
//! closed on the right). The low level is the centre of the busiest bin in the
//! lower half of the bin range, the high level the centre of the busiest bin in
//! the upper half. The midpoint bin `floor(bins / 2)` belongs to the upper half
//! and ties go to the lowest bin index.
//!
//! `low <= high` is not guaranteed.

use serde::{Deserialize, Serialize};

pub const DEFAULT_BINS: usize = 20;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FrequentLevels {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub counts: Vec<usize>,
    pub min: f64,
    pub max: f64,
}

impl Histogram {
    /// Bins `values` into `bins` equal-width buckets over their own range.
    /// Returns `None` for empty input.
    pub fn build(values: &[f64], bins: usize) -> Option<Self> {
        let bins = bins.max(1);
        let (min, max) = values.iter().fold(None, |acc: Option<(f64, f64)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;

        let mut hist = Self {
            counts: vec![0; bins],
            min,
            max,
        };
        for &v in values {
            let idx = hist.bin_index(v);
            hist.counts[idx] += 1;
        }
        Some(hist)
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    fn width(&self) -> f64 {
        (self.max - self.min) / self.bins() as f64
    }

    pub fn edge(&self, i: usize) -> f64 {
        if i >= self.bins() {
            self.max
        } else {
            self.min + i as f64 * self.width()
        }
    }

    pub fn center(&self, i: usize) -> f64 {
        (self.edge(i) + self.edge(i + 1)) / 2.0
    }

    fn bin_index(&self, v: f64) -> usize {
        let bins = self.bins();
        let width = self.width();
        if !(width > 0.0) {
            return 0;
        }
        let mut idx = (((v - self.min) / width) as usize).min(bins - 1);
        // The division can land one bin off near an edge; settle against the edges.
        if idx > 0 && v < self.edge(idx) {
            idx -= 1;
        } else if idx + 1 < bins && v >= self.edge(idx + 1) {
            idx += 1;
        }
        idx
    }

    /// Index of the largest count in `start..end`, first occurrence on ties.
    fn busiest(&self, start: usize, end: usize) -> usize {
        (start..end).fold(start, |best, i| {
            if self.counts[i] > self.counts[best] { i } else { best }
        })
    }
}

impl FrequentLevels {
    /// Derives the low/high frequent levels from `closes`.
    ///
    /// `bins` below 2 is raised to 2 so both halves hold a bin. A flat series
    /// collapses both levels onto its single price.
    pub fn from_closes(closes: &[f64], bins: usize) -> Option<Self> {
        let hist = Histogram::build(closes, bins.max(2))?;

        if hist.max == hist.min {
            let level = round4(hist.min);
            return Some(Self { low: level, high: level });
        }

        let half = hist.bins() / 2;
        let low_bin = hist.busiest(0, half);
        let high_bin = hist.busiest(half, hist.bins());

        Some(Self {
            low: round4(hist.center(low_bin)),
            high: round4(hist.center(high_bin)),
        })
    }
}

pub fn round4(v: f64) -> f64 {
    round_to(v, 4)
}

pub fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn flat_series_collapses_to_single_level() {
        let closes = vec![100.0; 20];
        let levels = FrequentLevels::from_closes(&closes, DEFAULT_BINS).unwrap();
        assert_eq!(levels, FrequentLevels { low: 100.0, high: 100.0 });
    }

    #[test]
    fn single_value_is_well_defined() {
        let levels = FrequentLevels::from_closes(&[0.123456], DEFAULT_BINS).unwrap();
        assert_eq!(levels.low, 0.1235);
        assert_eq!(levels.high, 0.1235);
    }

    #[test]
    fn empty_input_has_no_levels() {
        assert!(FrequentLevels::from_closes(&[], DEFAULT_BINS).is_none());
    }

    #[test]
    fn picks_busiest_bin_in_each_half() {
        // Range 99..109 over 20 bins gives width 0.5.
        let closes = [
            104.0, 103.0, 102.0, 101.0, 99.0, 100.0, 100.0, 100.0, 100.0, 100.2, 102.0, 105.0,
            107.0, 109.0, 109.0, 109.0, 109.0, 109.0, 108.8, 108.0, 107.0,
        ];
        let levels = FrequentLevels::from_closes(&closes, DEFAULT_BINS).unwrap();
        assert_eq!(levels, FrequentLevels { low: 100.25, high: 108.75 });
    }

    #[test]
    fn ties_resolve_to_lowest_bin() {
        // Range 0..10 over 10 bins, one value per bin except the maximum.
        let closes: Vec<f64> = (0..=10).map(f64::from).collect();
        let levels = FrequentLevels::from_closes(&closes, 10).unwrap();
        assert_eq!(levels.low, 0.5);
        // Bin 9 holds both 9 and 10, the only double.
        assert_eq!(levels.high, 9.5);
    }

    #[test]
    fn midpoint_bin_belongs_to_upper_half() {
        // Four bins over 0..4: bins 0,1 are the lower half, 2,3 the upper.
        // Bin 2 is the busiest overall and must be picked as the high level.
        let closes = [0.1, 1.1, 2.1, 2.2, 2.3, 3.9, 4.0];
        let hist = Histogram::build(&closes, 4).unwrap();
        assert_eq!(hist.counts, vec![1, 1, 3, 2]);

        let levels = FrequentLevels::from_closes(&closes, 4).unwrap();
        assert_eq!(levels.high, round4(hist.center(2)));
        assert_eq!(levels.low, round4(hist.center(0)));
    }

    #[test]
    fn maximum_lands_in_last_bin() {
        let hist = Histogram::build(&[1.0, 2.0, 3.0], 20).unwrap();
        assert_eq!(hist.counts[19], 1);
        assert_eq!(hist.counts[0], 1);
        assert_eq!(hist.counts.iter().sum::<usize>(), 3);
    }

    #[test]
    fn monotonic_ramp_low_level_sits_near_the_bottom() {
        let closes: Vec<f64> = (0..30).map(|i| 10.0 + i as f64 * 20.0 / 29.0).collect();
        let levels = FrequentLevels::from_closes(&closes, DEFAULT_BINS).unwrap();
        assert_eq!(levels.low, 10.5);
        assert!(levels.high > 20.0);
    }

    #[test]
    fn one_bin_is_raised_to_two() {
        let levels = FrequentLevels::from_closes(&[1.0, 1.2, 3.0, 2.9, 2.8], 1).unwrap();
        assert_eq!(levels.low, 1.5);
        assert_eq!(levels.high, 2.5);
    }

    proptest! {
        #[test]
        fn levels_stay_within_price_range(
            closes in prop::collection::vec(0.0001f64..1_000_000.0, 1..200),
            bins in 2usize..64,
        ) {
            let levels = FrequentLevels::from_closes(&closes, bins).unwrap();
            let min = closes.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = closes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(levels.low >= round4(min) - 1e-4);
            prop_assert!(levels.high <= round4(max) + 1e-4);
            prop_assert_eq!(FrequentLevels::from_closes(&closes, bins), Some(levels));
        }

        #[test]
        fn histogram_counts_every_value(
            closes in prop::collection::vec(-1e6f64..1e6, 1..200),
            bins in 1usize..64,
        ) {
            let hist = Histogram::build(&closes, bins).unwrap();
            prop_assert_eq!(hist.counts.iter().sum::<usize>(), closes.len());
        }
    }
}
