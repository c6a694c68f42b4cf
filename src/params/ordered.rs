//! Small value types whose constructors enforce an ordering.
//!
//! Genetic operators freely permute gene values, so ordering constraints are
//! resolved by sorting and reassigning by role rather than by clamping.

use serde::{Deserialize, Serialize};

fn sort_f64<const N: usize>(mut values: [f64; N]) -> [f64; N] {
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// Three multipliers ordered tightest <= default <= widest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderedTriple {
    tightest: f64,
    default: f64,
    widest: f64,
}

impl OrderedTriple {
    pub fn from_unsorted(a: f64, b: f64, c: f64) -> Self {
        let [tightest, default, widest] = sort_f64([a, b, c]);
        Self {
            tightest,
            default,
            widest,
        }
    }

    pub fn tightest(&self) -> f64 {
        self.tightest
    }

    pub fn default(&self) -> f64 {
        self.default
    }

    pub fn widest(&self) -> f64 {
        self.widest
    }
}

/// Two values ordered low <= high
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderedPair {
    low: f64,
    high: f64,
}

impl OrderedPair {
    pub fn from_unsorted(a: f64, b: f64) -> Self {
        let [low, high] = sort_f64([a, b]);
        Self { low, high }
    }

    /// Sorted, then `high` is pushed up to keep at least `min_gap` of separation
    pub fn with_min_gap(a: f64, b: f64, min_gap: f64) -> Self {
        let mut pair = Self::from_unsorted(a, b);
        pair.high = pair.high.max(pair.low + min_gap);
        pair
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    /// Linear interpolation from `low` (t=0) to `high` (t=1); t is clamped
    pub fn lerp(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        self.low + (self.high - self.low) * t
    }
}

/// Oscillator zones: oversold < neutral_low < neutral_high < overbought
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OscillatorZones {
    oversold: f64,
    neutral_low: f64,
    neutral_high: f64,
    overbought: f64,
}

impl OscillatorZones {
    /// Sorts the four thresholds and pushes each one up to keep `min_gap`
    /// from its predecessor.
    pub fn from_unsorted(values: [f64; 4], min_gap: f64) -> Self {
        let mut sorted = sort_f64(values);
        for i in 1..sorted.len() {
            sorted[i] = sorted[i].max(sorted[i - 1] + min_gap);
        }
        let [oversold, neutral_low, neutral_high, overbought] = sorted;
        Self {
            oversold,
            neutral_low,
            neutral_high,
            overbought,
        }
    }

    pub fn oversold(&self) -> f64 {
        self.oversold
    }

    pub fn neutral_low(&self) -> f64 {
        self.neutral_low
    }

    pub fn neutral_high(&self) -> f64 {
        self.neutral_high
    }

    pub fn overbought(&self) -> f64 {
        self.overbought
    }
}

/// Recency-decay multipliers, non-increasing from freshest to stalest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecaySchedule {
    fresh: f64,
    recent: f64,
    day: f64,
    stale: f64,
}

impl DecaySchedule {
    pub fn from_unsorted(values: [f64; 4]) -> Self {
        let [stale, day, recent, fresh] = sort_f64(values);
        Self {
            fresh,
            recent,
            day,
            stale,
        }
    }

    pub fn fresh(&self) -> f64 {
        self.fresh
    }

    pub fn recent(&self) -> f64 {
        self.recent
    }

    pub fn day(&self) -> f64 {
        self.day
    }

    pub fn stale(&self) -> f64 {
        self.stale
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.fresh, self.recent, self.day, self.stale]
    }
}
