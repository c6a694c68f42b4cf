//! The 52-dimension search space: bounds, integer typing and the deployed baseline.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

use super::resolved::{ParamChange, ResolvedConfig};

/// One searchable dimension
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Dimension {
    pub name: &'static str,
    pub lower: f64,
    pub upper: f64,
    pub integer: bool,
    /// Value in the currently deployed configuration
    pub baseline: f64,
}

impl Dimension {
    const fn real(name: &'static str, lower: f64, upper: f64, baseline: f64) -> Self {
        Self {
            name,
            lower,
            upper,
            integer: false,
            baseline,
        }
    }

    const fn int(name: &'static str, lower: f64, upper: f64, baseline: f64) -> Self {
        Self {
            name,
            lower,
            upper,
            integer: true,
            baseline,
        }
    }

    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    /// Clamp into bounds and round integer dimensions. Non-finite input
    /// falls back to the baseline value.
    pub fn sanitize(&self, value: f64) -> f64 {
        let v = if value.is_finite() { value } else { self.baseline };
        let v = v.clamp(self.lower, self.upper);
        if self.integer {
            v.round()
        } else {
            v
        }
    }
}

pub const DIMENSION_COUNT: usize = 52;

/// Gene indices, grouped the way the decoder resolves them
pub mod idx {
    pub const WEIGHT_SENTIMENT: usize = 0;
    pub const WEIGHT_TECHNICAL: usize = 1;
    pub const TECH_WEIGHT_MA: usize = 2;
    pub const TECH_WEIGHT_RSI: usize = 3;
    pub const TECH_WEIGHT_MACD: usize = 4;
    pub const TECH_WEIGHT_BOLLINGER: usize = 5;
    pub const DECAY_FRESH: usize = 6;
    pub const DECAY_STALE: usize = 9;
    pub const CREDIBILITY_HIGH: usize = 10;
    pub const CREDIBILITY_LOW: usize = 11;
    pub const RSI_OVERSOLD: usize = 12;
    pub const RSI_OVERBOUGHT: usize = 15;
    pub const STOCH_OVERSOLD: usize = 16;
    pub const STOCH_OVERBOUGHT: usize = 17;
    pub const MA_SCORE: usize = 18;
    pub const RSI_EXTREME_SCORE: usize = 19;
    pub const RSI_MILD_SCORE: usize = 20;
    pub const RSI_TREND_DAMPENING: usize = 21;
    pub const MACD_SCORE: usize = 22;
    pub const BOLLINGER_SCORE: usize = 23;
    pub const STOCH_SCORE: usize = 24;
    pub const ALIGN_ALL_THRESHOLD: usize = 25;
    pub const ALIGN_ALL_BONUS: usize = 26;
    pub const ALIGN_TECH_RISK_THRESHOLD: usize = 27;
    pub const ALIGN_TECH_RISK_BONUS: usize = 28;
    pub const ALIGN_SENT_TECH_THRESHOLD: usize = 29;
    pub const ALIGN_SENT_TECH_BONUS: usize = 30;
    pub const ALIGN_SENT_RISK_THRESHOLD: usize = 31;
    pub const ALIGN_SENT_RISK_BONUS: usize = 32;
    pub const HOLD_ZONE: usize = 33;
    pub const ACTIVATION_THRESHOLD: usize = 34;
    pub const OPPOSING_THRESHOLD: usize = 35;
    pub const SWING_STOP_FIRST: usize = 36;
    pub const SWING_TARGET_FIRST: usize = 39;
    pub const DAY_STOP_FIRST: usize = 41;
    pub const DAY_TARGET_FIRST: usize = 44;
    pub const SR_BLEND_NEAR: usize = 46;
    pub const SR_BLEND_FAR: usize = 47;
    pub const MIN_RISK_REWARD: usize = 48;
    pub const TRAILING_TIGHTEN_DAY: usize = 49;
    pub const TRAILING_TIGHTEN_FACTOR: usize = 50;
    pub const MAX_HOLD_DAYS: usize = 51;
}

pub const DIMENSIONS: [Dimension; DIMENSION_COUNT] = [
    // Top-level score weights (risk is the residual)
    Dimension::real("weight_sentiment", 0.05, 0.60, 0.30),
    Dimension::real("weight_technical", 0.10, 0.80, 0.45),
    // Technical component weights (stochastic is the residual)
    Dimension::real("tech_weight_ma", 0.05, 0.50, 0.25),
    Dimension::real("tech_weight_rsi", 0.05, 0.50, 0.25),
    Dimension::real("tech_weight_macd", 0.05, 0.50, 0.20),
    Dimension::real("tech_weight_bollinger", 0.05, 0.50, 0.15),
    // Sentiment recency decay
    Dimension::real("decay_fresh", 0.60, 1.00, 1.00),
    Dimension::real("decay_recent", 0.30, 1.00, 0.70),
    Dimension::real("decay_day", 0.10, 0.80, 0.40),
    Dimension::real("decay_stale", 0.00, 0.50, 0.15),
    // Source credibility multipliers
    Dimension::real("credibility_high", 0.50, 1.50, 1.00),
    Dimension::real("credibility_low", 0.00, 1.00, 0.40),
    // RSI zones
    Dimension::int("rsi_oversold", 15.0, 40.0, 30.0),
    Dimension::int("rsi_neutral_low", 35.0, 50.0, 45.0),
    Dimension::int("rsi_neutral_high", 50.0, 65.0, 55.0),
    Dimension::int("rsi_overbought", 60.0, 85.0, 70.0),
    // Stochastic zones
    Dimension::int("stoch_oversold", 5.0, 35.0, 20.0),
    Dimension::int("stoch_overbought", 65.0, 95.0, 80.0),
    // Bullish sub-indicator magnitudes (bearish mirrors these)
    Dimension::real("ma_score", 20.0, 100.0, 60.0),
    Dimension::real("rsi_extreme_score", 20.0, 100.0, 70.0),
    Dimension::real("rsi_mild_score", 5.0, 60.0, 30.0),
    Dimension::real("rsi_trend_dampening", 0.0, 1.0, 0.5),
    Dimension::real("macd_score", 20.0, 100.0, 50.0),
    Dimension::real("bollinger_score", 20.0, 100.0, 50.0),
    Dimension::real("stoch_score", 20.0, 100.0, 40.0),
    // Alignment bonus tiers
    Dimension::real("align_all_threshold", 10.0, 60.0, 30.0),
    Dimension::real("align_all_bonus", 0.0, 25.0, 15.0),
    Dimension::real("align_tech_risk_threshold", 10.0, 60.0, 35.0),
    Dimension::real("align_tech_risk_bonus", 0.0, 20.0, 10.0),
    Dimension::real("align_sent_tech_threshold", 10.0, 60.0, 35.0),
    Dimension::real("align_sent_tech_bonus", 0.0, 20.0, 8.0),
    Dimension::real("align_sent_risk_threshold", 10.0, 60.0, 40.0),
    Dimension::real("align_sent_risk_bonus", 0.0, 15.0, 5.0),
    // Decision thresholds
    Dimension::real("hold_zone", 5.0, 40.0, 15.0),
    Dimension::real("activation_threshold", 10.0, 60.0, 25.0),
    Dimension::real("opposing_threshold", 10.0, 70.0, 30.0),
    // Swing (long) ATR multipliers
    Dimension::real("swing_stop_high_conf", 1.0, 3.0, 1.5),
    Dimension::real("swing_stop_default", 1.2, 3.5, 2.0),
    Dimension::real("swing_stop_low_conf", 1.5, 4.0, 2.5),
    Dimension::real("swing_target_low_vol", 1.5, 5.0, 3.0),
    Dimension::real("swing_target_high_vol", 2.0, 7.0, 4.0),
    // Day-trade (short) ATR multipliers
    Dimension::real("day_stop_high_conf", 0.5, 2.0, 0.8),
    Dimension::real("day_stop_default", 0.6, 2.5, 1.0),
    Dimension::real("day_stop_low_conf", 0.8, 3.0, 1.3),
    Dimension::real("day_target_low_vol", 0.8, 3.0, 1.5),
    Dimension::real("day_target_high_vol", 1.0, 4.0, 2.0),
    // Support/resistance blend band, in ATR units
    Dimension::real("sr_blend_near_atr", 0.1, 1.0, 0.5),
    Dimension::real("sr_blend_far_atr", 1.0, 4.0, 2.0),
    Dimension::real("min_risk_reward", 1.0, 3.0, 1.5),
    // Holding rules
    Dimension::int("trailing_tighten_day", 2.0, 10.0, 5.0),
    Dimension::real("trailing_tighten_factor", 0.3, 1.0, 0.6),
    Dimension::int("max_hold_days", 3.0, 20.0, 10.0),
];

/// Fixed-length search vector. Owned by the search; never aliased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigVector(Vec<f64>);

impl ConfigVector {
    pub fn new(genes: Vec<f64>) -> Self {
        ConfigVector(genes)
    }

    pub fn genes_mut(&mut self) -> &mut [f64] {
        &mut self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for ConfigVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

/// Bounds, decoding and baseline for the search vector
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterSpace;

impl ParameterSpace {
    pub fn new() -> Self {
        ParameterSpace
    }

    pub fn dimensions(&self) -> &'static [Dimension] {
        &DIMENSIONS
    }

    pub fn len(&self) -> usize {
        DIMENSION_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// The currently deployed configuration
    pub fn baseline_vector(&self) -> ConfigVector {
        ConfigVector(DIMENSIONS.iter().map(|d| d.baseline).collect())
    }

    pub fn baseline(&self) -> ResolvedConfig {
        self.decode(&self.baseline_vector())
    }

    /// Uniform draw inside every dimension's bounds
    pub fn random_vector<R: Rng + ?Sized>(&self, rng: &mut R) -> ConfigVector {
        ConfigVector(
            DIMENSIONS
                .iter()
                .map(|d| d.sanitize(rng.gen_range(d.lower..=d.upper)))
                .collect(),
        )
    }

    /// Clamp every gene into bounds (rounding integers)
    pub fn clamp(&self, vector: &mut ConfigVector) {
        for (gene, dim) in vector.genes_mut().iter_mut().zip(DIMENSIONS.iter()) {
            *gene = dim.sanitize(*gene);
        }
    }

    /// Deterministic decode into a constraint-satisfying configuration.
    ///
    /// Short vectors are padded with baseline values; extra genes are ignored.
    pub fn decode(&self, vector: &[f64]) -> ResolvedConfig {
        let mut genes = [0.0; DIMENSION_COUNT];
        for (i, dim) in DIMENSIONS.iter().enumerate() {
            let raw = vector.get(i).copied().unwrap_or(dim.baseline);
            genes[i] = dim.sanitize(raw);
        }
        ResolvedConfig::from_genes(&genes)
    }

    /// Resolved parameters of `vector` that differ from the decoded baseline
    pub fn diff(&self, vector: &[f64]) -> Vec<ParamChange> {
        self.baseline().diff(&self.decode(vector), super::resolved::DIFF_EPSILON)
    }
}
